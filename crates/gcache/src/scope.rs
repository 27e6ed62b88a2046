// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache-enable scope.
//!
//! Caching is disabled by default to prevent accidental caching in write
//! paths; callers opt read paths in explicitly. The flag is ambient: async
//! callers wrap futures with [`scoped`], sync callers hold a [`ScopeGuard`],
//! and the bridge captures the caller's state at dispatch time and installs
//! it inside the worker so sync callers observe identical semantics.
//!
//! `None` means no scope is active; `Some(false)` is an explicit disable,
//! reported separately in metrics.

use std::cell::Cell;

tokio::task_local! {
    static TASK_ENABLED: Option<bool>;
}

thread_local! {
    static THREAD_ENABLED: Cell<Option<bool>> = const { Cell::new(None) };
}

/// Returns the ambient enable state: the current task's scope if one is
/// installed, otherwise the current thread's.
///
/// An installed task state is authoritative even when it is `None`; a
/// bridge worker running a call whose submitter had no scope must not
/// inherit whatever state the worker thread itself happens to carry.
#[must_use]
pub fn current_state() -> Option<bool> {
    match TASK_ENABLED.try_with(|state| *state) {
        Ok(state) => state,
        Err(_) => THREAD_ENABLED.with(Cell::get),
    }
}

/// Returns whether caching is enabled for the current task or thread.
#[must_use]
pub fn is_enabled() -> bool {
    current_state() == Some(true)
}

/// Runs a future with the enable scope set for its whole duration.
///
/// Scopes nest strictly: the innermost wrapper wins, and the previous state
/// is restored when the future completes, errors, or is dropped.
///
/// # Examples
///
/// ```
/// # futures::executor::block_on(async {
/// assert!(!gcache::scope::is_enabled());
/// gcache::scope::scoped(true, async {
///     assert!(gcache::scope::is_enabled());
///     gcache::scope::scoped(false, async {
///         assert!(!gcache::scope::is_enabled());
///     })
///     .await;
///     assert!(gcache::scope::is_enabled());
/// })
/// .await;
/// # });
/// ```
pub async fn scoped<F: Future>(enabled: bool, f: F) -> F::Output {
    TASK_ENABLED.scope(Some(enabled), f).await
}

/// Runs a future under a previously captured state, as if the future were a
/// continuation of the capturing task. Used by the bridge.
pub(crate) async fn scoped_state<F: Future>(state: Option<bool>, f: F) -> F::Output {
    TASK_ENABLED.scope(state, f).await
}

/// A sync enable scope, active until dropped.
///
/// Guards restore the previous thread state on drop, so nested guards
/// behave LIFO on every exit path, including unwinding.
#[derive(Debug)]
#[must_use = "the scope ends when the guard is dropped"]
pub struct ScopeGuard {
    previous: Option<bool>,
}

/// Opens a sync enable scope on the current thread.
///
/// # Examples
///
/// ```
/// assert!(!gcache::scope::is_enabled());
/// {
///     let _scope = gcache::scope::enable(true);
///     assert!(gcache::scope::is_enabled());
/// }
/// assert!(!gcache::scope::is_enabled());
/// ```
pub fn enable(enabled: bool) -> ScopeGuard {
    let previous = THREAD_ENABLED.with(|state| state.replace(Some(enabled)));
    ScopeGuard { previous }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        THREAD_ENABLED.with(|state| state.set(self.previous));
    }
}
