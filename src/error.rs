// Copyright 2023, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Errors surfaced on the adapter API.

use thiserror::Error;

/// Errors that can be encountered while using the adapter
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// There is no activated endpoint to talk to.
    #[error("No active target")]
    NoTarget,
    /// A transmission is already in progress on the target.
    #[error("Transmission already in progress")]
    TransmitBusy,
    /// The NCI core went away.
    #[error("NCI command channel is closed")]
    NciClosed,
}
