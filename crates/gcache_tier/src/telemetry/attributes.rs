// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub(crate) const USE_CASE: &str = "use_case";
pub(crate) const KEY_TYPE: &str = "key_type";
pub(crate) const LAYER: &str = "layer";
pub(crate) const REASON: &str = "reason";
pub(crate) const STAGE: &str = "stage";
pub(crate) const DIRECTION: &str = "direction";
