// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Extension trait for timing async operations against a [`Clock`].

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use tick::{Clock, Stopwatch};

/// Result of a timed async operation.
#[derive(Debug)]
pub(crate) struct TimedResult<R> {
    /// The result of the operation.
    pub result: R,
    /// The duration of the operation.
    pub duration: Duration,
}

pin_project! {
    /// A future that times the inner future's execution.
    #[must_use = "futures do nothing unless polled"]
    pub(crate) struct Timed<F> {
        #[pin]
        inner: F,
        watch: Stopwatch,
    }
}

impl<F: Future> Future for Timed<F> {
    type Output = TimedResult<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(result) => Poll::Ready(TimedResult {
                result,
                duration: this.watch.elapsed(),
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Extension trait for timing async operations.
pub(crate) trait ClockExt {
    /// Times an async operation, returning both the result and the elapsed
    /// duration.
    fn timed_async<F>(&self, f: F) -> Timed<F>
    where
        F: Future;
}

impl ClockExt for Clock {
    fn timed_async<F>(&self, f: F) -> Timed<F>
    where
        F: Future,
    {
        Timed {
            inner: f,
            watch: Stopwatch::new(self),
        }
    }
}
