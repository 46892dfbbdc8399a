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

//! Object detection: maps an interface activation to the framework
//! object that represents it, converting NCI parameters to the
//! framework's parameter structs along the way.

use crate::framework::{
    Framework, ObjectId, ParamIsoDepPollA, ParamIsoDepPollB, ParamNfcDep, ParamPollA, ParamPollB,
    ParamPollF, TagTechParams,
};
use crate::nci::types::{
    ActivationParam, IntfActivated, RfInterface, RfMode, RfProtocol, Technology,
};
use log::debug;

pub(crate) fn poll_a_param(ntf: &IntfActivated) -> Option<ParamPollA> {
    ntf.poll_a().map(|p| ParamPollA { sel_res: p.sel_res, nfcid1: p.nfcid1.clone() })
}

pub(crate) fn poll_b_param(ntf: &IntfActivated) -> Option<ParamPollB> {
    ntf.poll_b().map(|p| ParamPollB {
        nfcid0: p.nfcid0,
        fsc: p.fsc,
        app_data: p.app_data,
        prot_info: p.prot_info.clone(),
    })
}

pub(crate) fn poll_f_param(ntf: &IntfActivated) -> Option<ParamPollF> {
    ntf.poll_f().map(|p| ParamPollF { nfcid2: p.nfcid2 })
}

pub(crate) fn iso_dep_poll_a_param(ntf: &IntfActivated) -> Option<ParamIsoDepPollA> {
    match &ntf.activation_param {
        Some(ActivationParam::IsoDepPollA(p)) => {
            Some(ParamIsoDepPollA { fsc: p.fsc, t1: p.t1.clone() })
        }
        _ => None,
    }
}

pub(crate) fn iso_dep_poll_b_param(ntf: &IntfActivated) -> Option<ParamIsoDepPollB> {
    match &ntf.activation_param {
        Some(ActivationParam::IsoDepPollB(p)) => {
            Some(ParamIsoDepPollB { mbli: p.mbli, hlr: p.hlr.clone() })
        }
        _ => None,
    }
}

pub(crate) fn nfc_dep_param(ntf: &IntfActivated) -> Option<ParamNfcDep> {
    match &ntf.activation_param {
        Some(ActivationParam::NfcDepPoll(p)) => Some(ParamNfcDep { g: p.g.clone() }),
        Some(ActivationParam::NfcDepListen(p)) => Some(ParamNfcDep { g: p.g.clone() }),
        _ => None,
    }
}

/// Framework object detected for a poll side activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PollEndpoint {
    Tag(ObjectId),
    Peer(ObjectId),
}

/// Run the poll side factory chain: peer, known tag type, generic tag.
pub(crate) fn detect_poll(fw: &mut dyn Framework, ntf: &IntfActivated) -> Option<PollEndpoint> {
    if ntf.protocol == RfProtocol::NfcDep && ntf.rf_intf == RfInterface::NfcDep {
        if let Some(nfc_dep) = nfc_dep_param(ntf) {
            let peer = match ntf.mode {
                RfMode::PassivePollA | RfMode::ActivePollA => {
                    fw.peer_initiator_a(poll_a_param(ntf), nfc_dep)
                }
                RfMode::PassivePollF | RfMode::ActivePollF => {
                    fw.peer_initiator_f(poll_f_param(ntf), nfc_dep)
                }
                _ => None,
            };
            if let Some(id) = peer {
                return Some(PollEndpoint::Peer(id));
            }
        }
    }

    let tag = match (ntf.protocol, ntf.rf_intf, ntf.mode) {
        (RfProtocol::T2t, RfInterface::Frame, RfMode::PassivePollA | RfMode::ActivePollA) => {
            poll_a_param(ntf).and_then(|pa| fw.tag_t2(pa))
        }
        (RfProtocol::IsoDep, RfInterface::IsoDep, RfMode::PassivePollA) => poll_a_param(ntf)
            .zip(iso_dep_poll_a_param(ntf))
            .and_then(|(pa, act)| fw.tag_t4a(pa, act)),
        (RfProtocol::IsoDep, RfInterface::IsoDep, RfMode::PassivePollB) => poll_b_param(ntf)
            .zip(iso_dep_poll_b_param(ntf))
            .and_then(|(pb, act)| fw.tag_t4b(pb, act)),
        _ => None,
    };
    if let Some(id) = tag {
        return Some(PollEndpoint::Tag(id));
    }

    // No dedicated factory took it, register whatever we can describe.
    if let Some(pa) = poll_a_param(ntf) {
        return fw.tag_other(TagTechParams::A(pa)).map(PollEndpoint::Tag);
    }
    if let Some(pb) = poll_b_param(ntf) {
        return fw.tag_other(TagTechParams::B(pb)).map(PollEndpoint::Tag);
    }
    debug!("no tag parameters in {:?} activation", ntf.mode);
    None
}

/// Framework object detected for a listen side activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListenEndpoint {
    Peer(ObjectId),
    Host(ObjectId),
}

/// Run the listen side factory chain on an already created initiator:
/// peer target for NFC-DEP, card emulation host for ISO-DEP.
pub(crate) fn detect_listen(
    fw: &mut dyn Framework,
    initiator: ObjectId,
    ntf: &IntfActivated,
) -> Option<ListenEndpoint> {
    if ntf.rf_intf == RfInterface::NfcDep {
        let tech = match ntf.mode {
            RfMode::PassiveListenA | RfMode::ActiveListenA => Some(Technology::A),
            RfMode::PassiveListenF | RfMode::ActiveListenF => Some(Technology::F),
            _ => None,
        };
        if let Some(tech) = tech {
            if let Some(id) = fw.peer_target(initiator, tech, nfc_dep_param(ntf)) {
                return Some(ListenEndpoint::Peer(id));
            }
        }
    }
    if ntf.rf_intf == RfInterface::IsoDep && ntf.mode.is_listen() {
        if let Some(id) = fw.host(initiator) {
            return Some(ListenEndpoint::Host(id));
        }
    }
    None
}
