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

//! NCI adapter core
//!
//! Glue between an NCI protocol stack and the NFC daemon framework
//! above it: translates RF discovery state transitions and interface
//! activations into the framework's endpoint model (tags, peers, card
//! emulation hosts), keeps endpoints alive across brief RF losses and
//! moves application data through the NCI data path with the framing
//! of the active RF interface.

pub mod adapter;
mod detect;
pub mod error;
pub mod framework;
pub mod intf;
pub mod nci;
mod target;

pub use adapter::{Adapter, AdapterRequest, InternalState};
pub use error::AdapterError;
pub use framework::{Framework, ObjectId, TransmitId, TransmitStatus};
pub use nci::{NciCommand, NciEvent, NciHandle};
