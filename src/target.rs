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

//! Poll side data path for an activated remote endpoint.
//!
//! A [`Target`] owns one transmission at a time and carries the framing
//! strategy of its RF interface. A reply may legitimately arrive before
//! the completion of the send that triggered it (multi-threaded HAL
//! drivers deliver the data callback first); such replies are buffered
//! and delivered once the send completes.

use crate::error::AdapterError;
use crate::framework::{TransmitId, TransmitStatus};
use crate::nci::types::{
    IntfActivated, RfInterface, RfProtocol, STATIC_RF_CONN_ID, STATUS_OK, STATUS_OK_1_BIT,
    STATUS_OK_7_BIT, STATUS_RF_FRAME_CORRUPTED,
};
use crate::nci::{NciCommand, NciHandle, SendHandle};
use bytes::Bytes;
use log::{debug, error};
use tokio::time::Duration;

/// Type 2 READ of block 0, used as the presence probe.
pub(crate) const T2_PRESENCE_PROBE: [u8; 2] = [0x30, 0x00];

/// ISO-DEP transmissions get a budget longer than the slowest cards
/// observed in the field, instead of the much longer driver side error
/// timeouts.
pub(crate) const ISO_DEP_TRANSMIT_TIMEOUT: Duration = Duration::from_millis(2500);

/// How received payloads are turned into transmission results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransmitFinish {
    /// Frame RF: the last payload byte is a status code.
    Frame,
    /// ISO-DEP: the payload is the answer, verbatim.
    IsoDep,
    /// NFC-DEP: the payload is the answer, verbatim.
    NfcDep,
}

/// Presence probe issued for the endpoint's protocol, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PresenceStyle {
    T2Read,
    EmptyFrame,
    Unsupported,
}

/// Transmission timeout policy of the RF interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransmitTimeout {
    /// Leave the budget to the framework.
    FrameworkDefault,
    Fixed(Duration),
    /// NCI interface error notifications take over, no local budget.
    Disabled,
}

/// Who asked for the transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransmitKind {
    User,
    Presence,
}

#[derive(Clone, Copy, Debug)]
struct TransmitOp {
    id: TransmitId,
    kind: TransmitKind,
}

/// Result of a finished transmission, routed by the adapter to either
/// the framework or the presence check loop.
#[derive(Clone, Debug)]
pub(crate) struct TransmitOutcome {
    pub id: TransmitId,
    pub kind: TransmitKind,
    pub status: TransmitStatus,
    pub payload: Bytes,
}

pub(crate) struct Target {
    nci: NciHandle,
    conn_id: u8,
    finish: TransmitFinish,
    presence: PresenceStyle,
    timeout: TransmitTimeout,
    send_in_progress: Option<SendHandle>,
    transmit: Option<TransmitOp>,
    pending_reply: Option<Bytes>,
}

impl Target {
    /// Build the data path object for a poll side activation. Listen
    /// side activations have no target, they get an initiator instead.
    pub(crate) fn new(nci: NciHandle, ntf: &IntfActivated) -> Option<Target> {
        if !ntf.mode.is_poll() {
            return None;
        }
        let finish = match ntf.rf_intf {
            RfInterface::IsoDep => TransmitFinish::IsoDep,
            RfInterface::NfcDep => TransmitFinish::NfcDep,
            _ => TransmitFinish::Frame,
        };
        let presence = match ntf.protocol {
            RfProtocol::T2t => PresenceStyle::T2Read,
            RfProtocol::IsoDep => PresenceStyle::EmptyFrame,
            _ => PresenceStyle::Unsupported,
        };
        let timeout = match ntf.rf_intf {
            RfInterface::IsoDep => TransmitTimeout::Fixed(ISO_DEP_TRANSMIT_TIMEOUT),
            RfInterface::NfcDep => TransmitTimeout::Disabled,
            _ => TransmitTimeout::FrameworkDefault,
        };
        Some(Target {
            nci,
            conn_id: STATIC_RF_CONN_ID,
            finish,
            presence,
            timeout,
            send_in_progress: None,
            transmit: None,
            pending_reply: None,
        })
    }

    pub(crate) fn timeout(&self) -> TransmitTimeout {
        self.timeout
    }

    pub(crate) fn busy(&self) -> bool {
        self.transmit.is_some() || self.send_in_progress.is_some()
    }

    pub(crate) fn current_user_transmit(&self) -> Option<TransmitId> {
        self.transmit.filter(|op| op.kind == TransmitKind::User).map(|op| op.id)
    }

    /// Probe bytes for the endpoint's protocol, `None` when the
    /// protocol has no probe.
    pub(crate) fn presence_probe(&self) -> Option<Bytes> {
        match self.presence {
            PresenceStyle::T2Read => Some(Bytes::from_static(&T2_PRESENCE_PROBE)),
            PresenceStyle::EmptyFrame => Some(Bytes::new()),
            PresenceStyle::Unsupported => None,
        }
    }

    /// Start a transmission on the static RF connection.
    pub(crate) fn transmit(
        &mut self,
        id: TransmitId,
        kind: TransmitKind,
        handle: SendHandle,
        data: Bytes,
    ) -> Result<(), AdapterError> {
        if self.busy() {
            error!("refusing transmission, another one is in progress");
            return Err(AdapterError::TransmitBusy);
        }
        if !self.nci.send(NciCommand::SendData { handle, conn_id: self.conn_id, data }) {
            return Err(AdapterError::NciClosed);
        }
        self.send_in_progress = Some(handle);
        self.transmit = Some(TransmitOp { id, kind });
        Ok(())
    }

    /// The NCI core finished our outstanding send.
    pub(crate) fn on_send_complete(
        &mut self,
        handle: SendHandle,
        ok: bool,
    ) -> Option<TransmitOutcome> {
        if self.send_in_progress != Some(handle) {
            return None;
        }
        self.send_in_progress = None;
        if !ok {
            return self.fail_transmit();
        }
        if let Some(reply) = self.pending_reply.take() {
            debug!("delivering the reply buffered before send completion");
            return self.finish_transmit(reply);
        }
        None
    }

    /// A data packet arrived on a logical connection.
    pub(crate) fn on_data_packet(&mut self, conn_id: u8, data: &Bytes) -> Option<TransmitOutcome> {
        if conn_id != self.conn_id || self.transmit.is_none() || self.pending_reply.is_some() {
            return None;
        }
        if self.send_in_progress.is_some() {
            // The reply outran the completion of its own send.
            debug!("reply received before send completion, buffering");
            self.pending_reply = Some(data.clone());
            return None;
        }
        self.finish_transmit(data.clone())
    }

    /// Drop the in-flight transmission without a result, cancelling the
    /// send with the NCI core if it is still out.
    pub(crate) fn cancel_transmit(&mut self) {
        self.transmit = None;
        self.pending_reply = None;
        if let Some(handle) = self.send_in_progress.take() {
            self.nci.send(NciCommand::CancelSend(handle));
        }
    }

    /// Abort the in-flight transmission with an error result. Used for
    /// timeouts and teardown.
    pub(crate) fn abort_transmit(&mut self) -> Option<TransmitOutcome> {
        if let Some(handle) = self.send_in_progress.take() {
            self.nci.send(NciCommand::CancelSend(handle));
        }
        self.fail_transmit()
    }

    fn finish_transmit(&mut self, payload: Bytes) -> Option<TransmitOutcome> {
        let op = self.transmit.take()?;
        let (status, payload) = match self.finish {
            TransmitFinish::Frame => finish_frame(payload),
            TransmitFinish::IsoDep | TransmitFinish::NfcDep => (TransmitStatus::Ok, payload),
        };
        Some(TransmitOutcome { id: op.id, kind: op.kind, status, payload })
    }

    fn fail_transmit(&mut self) -> Option<TransmitOutcome> {
        let op = self.transmit.take()?;
        self.pending_reply = None;
        Some(TransmitOutcome {
            id: op.id,
            kind: op.kind,
            status: TransmitStatus::Error,
            payload: Bytes::new(),
        })
    }
}

fn finish_frame(payload: Bytes) -> (TransmitStatus, Bytes) {
    if payload.is_empty() {
        debug!("frame data without a status byte");
        return (TransmitStatus::Error, Bytes::new());
    }
    let status = payload[payload.len() - 1];
    let body = payload.slice(..payload.len() - 1);
    match status {
        STATUS_RF_FRAME_CORRUPTED => (TransmitStatus::Error, Bytes::new()),
        STATUS_OK | STATUS_OK_1_BIT..=STATUS_OK_7_BIT => (TransmitStatus::Ok, body),
        other => {
            // Unknown but not corrupted, let the upper layer decide.
            debug!("unexpected frame status {:#04x}", other);
            (TransmitStatus::Ok, body)
        }
    }
}
