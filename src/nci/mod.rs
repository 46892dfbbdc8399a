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

//! Boundary to the NCI core. The adapter never talks to the controller
//! directly: requests leave through a command channel and everything the
//! core observes comes back as [`NciEvent`] values on the adapter loop.

use bytes::Bytes;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub mod types;

pub use types::{
    IntfActivated, NciOpMask, NciParam, NciState, TechMask, STATIC_RF_CONN_ID,
};

/// Opaque handle of an outstanding data send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SendHandle(pub(crate) u64);

/// Requests issued by the adapter to the NCI core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NciCommand {
    /// Ask the RF state machine to move to the given state.
    SetState(NciState),
    /// Configure the discovery operations.
    SetOpMask(NciOpMask),
    /// Configure the discovery technologies.
    SetTechs(TechMask),
    /// Send a data packet on a logical connection. Completion is
    /// reported back as [`NciEvent::SendComplete`] for the same handle.
    SendData { handle: SendHandle, conn_id: u8, data: Bytes },
    /// Cancel an outstanding data send.
    CancelSend(SendHandle),
    /// Update configuration parameters, optionally resetting the rest.
    SetParams { params: Vec<(NciParam, Bytes)>, reset: bool },
}

/// Events delivered by the NCI core to the adapter loop.
#[derive(Clone, Debug)]
pub enum NciEvent {
    CurrentState(NciState),
    NextState(NciState),
    IntfActivated(IntfActivated),
    DataPacket { conn_id: u8, data: Bytes },
    SendComplete { handle: SendHandle, ok: bool },
    ParamChanged(NciParam),
}

/// Shared read-side view of the core's configuration parameters.
pub type ParamCache = Arc<Mutex<HashMap<NciParam, Bytes>>>;

/// Cloneable handle the adapter and its targets use to reach the core.
#[derive(Clone)]
pub struct NciHandle {
    cmd_tx: UnboundedSender<NciCommand>,
    params: ParamCache,
}

impl NciHandle {
    /// Create a handle together with the receiving end of its command
    /// channel. The caller wires the receiver into the NCI core.
    pub fn new() -> (NciHandle, UnboundedReceiver<NciCommand>) {
        Self::with_params(ParamCache::default())
    }

    /// Same as [`NciHandle::new`] with a caller supplied parameter cache.
    pub fn with_params(params: ParamCache) -> (NciHandle, UnboundedReceiver<NciCommand>) {
        let (cmd_tx, cmd_rx) = unbounded_channel();
        (NciHandle { cmd_tx, params }, cmd_rx)
    }

    /// Send a command to the core. Returns false when the core side of
    /// the channel is gone.
    pub(crate) fn send(&self, cmd: NciCommand) -> bool {
        match self.cmd_tx.send(cmd) {
            Ok(()) => true,
            Err(e) => {
                debug!("NCI command channel is closed: {}", e);
                false
            }
        }
    }

    /// Read a configuration parameter from the core's cache.
    pub fn param(&self, id: NciParam) -> Option<Bytes> {
        self.params.lock().unwrap().get(&id).cloned()
    }
}
