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

//! Boundary to the NFC daemon framework above the adapter.
//!
//! The framework owns the objects its factories create; the adapter only
//! keeps their [`ObjectId`] and is told through
//! [`AdapterRequest::ObjectDestroyed`](crate::adapter::AdapterRequest)
//! when one goes away, so a stored id can never dangle.

use crate::nci::types::Technology;
use bitflags::bitflags;

/// Registration id of a framework owned object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

/// Handle of a single transmission on the target data path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransmitId(pub(crate) u64);

/// Outcome of a transmission, as reported to the framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransmitStatus {
    Ok,
    Error,
}

bitflags! {
    /// Operating modes requested by the framework.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpModes: u8 {
        const READER_WRITER = 0x01;
        const P2P_INITIATOR = 0x02;
        const P2P_TARGET = 0x04;
        const CARD_EMULATION = 0x08;
    }
}

bitflags! {
    /// Flags of an active framework sequence on an endpoint.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SequenceFlags: u8 {
        const NO_PRESENCE_CHECKS = 0x01;
    }
}

/// Adapter parameters visible to the framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterParam {
    LaNfcid1,
}

/// Poll A parameters handed to tag and peer factories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamPollA {
    pub sel_res: u8,
    pub nfcid1: Vec<u8>,
}

/// Poll B parameters handed to tag factories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamPollB {
    pub nfcid0: [u8; 4],
    pub fsc: u16,
    pub app_data: [u8; 4],
    pub prot_info: Vec<u8>,
}

/// Poll F parameters handed to peer factories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamPollF {
    pub nfcid2: [u8; 8],
}

/// ISO-DEP activation parameters of a Type 4A tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamIsoDepPollA {
    pub fsc: u16,
    pub t1: Vec<u8>,
}

/// ISO-DEP activation parameters of a Type 4B tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamIsoDepPollB {
    pub mbli: u8,
    pub hlr: Vec<u8>,
}

/// NFC-DEP general bytes (ATR_RES on the poll side, ATR_REQ on the
/// listen side).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamNfcDep {
    pub g: Vec<u8>,
}

/// Technology parameters of a tag no dedicated factory accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagTechParams {
    A(ParamPollA),
    B(ParamPollB),
}

/// Factories and notifications of the framework layer.
///
/// Factories return `None` when the framework refuses the object; the
/// adapter then falls through its detection chain.
pub trait Framework {
    fn tag_t2(&mut self, poll_a: ParamPollA) -> Option<ObjectId>;
    fn tag_t4a(&mut self, poll_a: ParamPollA, iso_dep: ParamIsoDepPollA) -> Option<ObjectId>;
    fn tag_t4b(&mut self, poll_b: ParamPollB, iso_dep: ParamIsoDepPollB) -> Option<ObjectId>;
    fn tag_other(&mut self, params: TagTechParams) -> Option<ObjectId>;
    fn peer_initiator_a(
        &mut self,
        poll_a: Option<ParamPollA>,
        nfc_dep: ParamNfcDep,
    ) -> Option<ObjectId>;
    fn peer_initiator_f(
        &mut self,
        poll_f: Option<ParamPollF>,
        nfc_dep: ParamNfcDep,
    ) -> Option<ObjectId>;
    fn initiator(&mut self, tech: Technology) -> Option<ObjectId>;
    fn peer_target(
        &mut self,
        initiator: ObjectId,
        tech: Technology,
        nfc_dep: Option<ParamNfcDep>,
    ) -> Option<ObjectId>;
    fn host(&mut self, initiator: ObjectId) -> Option<ObjectId>;

    /// The endpoint left the field or was torn down.
    fn gone(&mut self, id: ObjectId);
    /// The endpoint survived an RF loss and is active again.
    fn reactivated(&mut self, id: ObjectId);
    /// A transmission finished.
    fn transmit_done(&mut self, id: TransmitId, status: TransmitStatus, payload: &[u8]);
    /// The effective operating mode changed. `confirmed` is true when
    /// the change acknowledges a framework request.
    fn mode_changed(&mut self, modes: OpModes, confirmed: bool);
    /// An adapter parameter changed under the framework.
    fn param_changed(&mut self, param: AdapterParam);

    /// Flags of the active sequence on the endpoint, empty when there
    /// is none.
    fn sequence_flags(&self, endpoint: ObjectId) -> SequenceFlags {
        let _ = endpoint;
        SequenceFlags::empty()
    }
}
