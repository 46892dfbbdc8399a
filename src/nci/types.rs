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

//! NCI data model: RF states, interfaces, protocols, modes, technology
//! masks and the parameters carried by an interface activation.

use bitflags::bitflags;
use bytes::Bytes;

/// Status appended by the NFCC to data received on the Frame RF interface.
pub const STATUS_OK: u8 = 0x00;
/// The received RF frame failed its integrity check.
pub const STATUS_RF_FRAME_CORRUPTED: u8 = 0x02;
/// Short frame reception, 1..7 valid bits in the last byte.
pub const STATUS_OK_1_BIT: u8 = 0x11;
pub const STATUS_OK_7_BIT: u8 = 0x17;

/// Static RF logical connection id.
pub const STATIC_RF_CONN_ID: u8 = 0x00;

/// Longest NFCID1 defined by the Digital Protocol.
pub const MAX_NFCID1_LEN: usize = 10;

/// RF communication states of the NCI state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NciState {
    Idle,
    Discovery,
    W4AllDiscoveries,
    W4HostSelect,
    PollActive,
    ListenActive,
    ListenSleep,
}

impl NciState {
    /// True for the states with an activated RF interface.
    pub fn is_active(self) -> bool {
        matches!(self, NciState::PollActive | NciState::ListenActive)
    }
}

/// RF interface selected for an activated remote endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfInterface {
    NfceeDirect,
    Frame,
    IsoDep,
    NfcDep,
    Proprietary(u8),
}

/// RF protocol of an activated remote endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfProtocol {
    Undetermined,
    T1t,
    T2t,
    T3t,
    T5t,
    IsoDep,
    NfcDep,
    Proprietary(u8),
}

/// RF technology and mode of an activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfMode {
    PassivePollA,
    PassivePollB,
    PassivePollF,
    ActivePollA,
    ActivePollF,
    PassivePollV,
    PassiveListenA,
    PassiveListenB,
    PassiveListenF,
    ActiveListenA,
    ActiveListenF,
    PassiveListenV,
}

impl RfMode {
    pub fn is_poll(self) -> bool {
        matches!(
            self,
            RfMode::PassivePollA
                | RfMode::PassivePollB
                | RfMode::PassivePollF
                | RfMode::ActivePollA
                | RfMode::ActivePollF
                | RfMode::PassivePollV
        )
    }

    pub fn is_listen(self) -> bool {
        !self.is_poll()
    }

    /// Radio technology of the mode, if it maps to one of A/B/F.
    pub fn technology(self) -> Option<Technology> {
        match self {
            RfMode::PassivePollA
            | RfMode::ActivePollA
            | RfMode::PassiveListenA
            | RfMode::ActiveListenA => Some(Technology::A),
            RfMode::PassivePollB | RfMode::PassiveListenB => Some(Technology::B),
            RfMode::PassivePollF
            | RfMode::ActivePollF
            | RfMode::PassiveListenF
            | RfMode::ActiveListenF => Some(Technology::F),
            RfMode::PassivePollV | RfMode::PassiveListenV => None,
        }
    }
}

/// NFC Forum radio technology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Technology {
    A,
    B,
    F,
}

bitflags! {
    /// NCI discovery technology mask.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TechMask: u16 {
        const A_POLL = 0x0001;
        const A_LISTEN = 0x0002;
        const B_POLL = 0x0004;
        const B_LISTEN = 0x0008;
        const F_POLL = 0x0010;
        const F_LISTEN = 0x0020;
        const V_POLL = 0x0040;
        const A = Self::A_POLL.bits() | Self::A_LISTEN.bits();
        const B = Self::B_POLL.bits() | Self::B_LISTEN.bits();
        const F = Self::F_POLL.bits() | Self::F_LISTEN.bits();
        const V = Self::V_POLL.bits();
        const ALL = Self::A.bits() | Self::B.bits() | Self::F.bits() | Self::V.bits();
    }
}

bitflags! {
    /// NCI operation mask submitted to the discovery configuration.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NciOpMask: u8 {
        const RW = 0x01;
        const PEER = 0x02;
        const CE = 0x04;
        const POLL = 0x08;
        const LISTEN = 0x10;
    }
}

/// NCI configuration parameters the adapter passes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NciParam {
    LaNfcid1 = 0x33,
}

// FSCI to FSC translation, ISO-DEP frame sizes.
const FSC_TABLE: [u16; 9] = [16, 24, 32, 40, 48, 64, 96, 128, 256];

fn fsc_from_fsci(fsci: u8) -> u16 {
    FSC_TABLE[usize::from(fsci.min(8))]
}

/// Poll A technology specific parameters (SENS_RES, NFCID1, SEL_RES).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollA {
    pub sens_res: [u8; 2],
    pub nfcid1: Vec<u8>,
    pub sel_res_len: u8,
    pub sel_res: u8,
}

/// Poll B technology specific parameters (SENSB_RES).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollB {
    pub nfcid0: [u8; 4],
    pub fsc: u16,
    pub app_data: [u8; 4],
    pub prot_info: Vec<u8>,
}

/// Poll F technology specific parameters (bit rate and SENSF_RES).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollF {
    pub bitrate: u8,
    pub nfcid2: [u8; 8],
}

/// Listen F technology specific parameters (local NFCID2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenF {
    pub nfcid2: Vec<u8>,
}

/// Parsed technology specific parameters of an activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeParam {
    PollA(PollA),
    PollB(PollB),
    PollF(PollF),
    ListenF(ListenF),
}

impl ModeParam {
    /// Decode the technology specific parameter bytes for `mode`.
    /// Truncated or unknown layouts yield `None`, the raw bytes are
    /// still kept by the caller for equality checks.
    pub fn parse(mode: RfMode, bytes: &[u8]) -> Option<ModeParam> {
        match mode {
            RfMode::PassivePollA => parse_poll_a(bytes).map(ModeParam::PollA),
            RfMode::PassivePollB => parse_poll_b(bytes).map(ModeParam::PollB),
            RfMode::PassivePollF => parse_poll_f(bytes).map(ModeParam::PollF),
            RfMode::PassiveListenF => parse_listen_f(bytes).map(ModeParam::ListenF),
            _ => None,
        }
    }
}

fn parse_poll_a(b: &[u8]) -> Option<PollA> {
    let sens_res = [*b.first()?, *b.get(1)?];
    let id_len = usize::from(*b.get(2)?);
    if id_len > MAX_NFCID1_LEN {
        return None;
    }
    let nfcid1 = b.get(3..3 + id_len)?.to_vec();
    let sel_res_len = *b.get(3 + id_len)?;
    let sel_res = if sel_res_len > 0 { *b.get(4 + id_len)? } else { 0 };
    Some(PollA { sens_res, nfcid1, sel_res_len, sel_res })
}

fn parse_poll_b(b: &[u8]) -> Option<PollB> {
    let len = usize::from(*b.first()?);
    let sensb = b.get(1..1 + len)?;
    // SENSB_RES: NFCID0 (4), application data (4), protocol info (3..4).
    if sensb.len() < 11 {
        return None;
    }
    let prot_info = sensb[8..].to_vec();
    Some(PollB {
        nfcid0: sensb[0..4].try_into().ok()?,
        fsc: fsc_from_fsci(prot_info[1] >> 4),
        app_data: sensb[4..8].try_into().ok()?,
        prot_info,
    })
}

fn parse_poll_f(b: &[u8]) -> Option<PollF> {
    let bitrate = *b.first()?;
    let len = usize::from(*b.get(1)?);
    let sensf = b.get(2..2 + len)?;
    Some(PollF { bitrate, nfcid2: sensf.get(0..8)?.try_into().ok()? })
}

fn parse_listen_f(b: &[u8]) -> Option<ListenF> {
    let len = usize::from(*b.first()?);
    Some(ListenF { nfcid2: b.get(1..1 + len)?.to_vec() })
}

/// ISO-DEP Poll A activation parameters, decoded from the ATS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsoDepPollA {
    pub fsc: u16,
    pub t1: Vec<u8>,
}

/// ISO-DEP Poll B activation parameters, decoded from the ATTRIB response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsoDepPollB {
    pub mbli: u8,
    pub hlr: Vec<u8>,
}

/// NFC-DEP Poll activation parameters, decoded from the ATR_RES.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfcDepPoll {
    pub nfcid3: [u8; 10],
    pub did: u8,
    pub bs: u8,
    pub br: u8,
    pub to: u8,
    pub pp: u8,
    pub g: Vec<u8>,
}

/// NFC-DEP Listen activation parameters, decoded from the ATR_REQ.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfcDepListen {
    pub nfcid3: [u8; 10],
    pub did: u8,
    pub bs: u8,
    pub br: u8,
    pub pp: u8,
    pub g: Vec<u8>,
}

/// Parsed interface specific parameters of an activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActivationParam {
    IsoDepPollA(IsoDepPollA),
    IsoDepPollB(IsoDepPollB),
    NfcDepPoll(NfcDepPoll),
    NfcDepListen(NfcDepListen),
}

impl ActivationParam {
    /// Decode the activation parameter bytes for the interface and mode.
    pub fn parse(rf_intf: RfInterface, mode: RfMode, bytes: &[u8]) -> Option<ActivationParam> {
        match (rf_intf, mode) {
            (RfInterface::IsoDep, RfMode::PassivePollA) => {
                parse_ats(bytes).map(ActivationParam::IsoDepPollA)
            }
            (RfInterface::IsoDep, RfMode::PassivePollB) => {
                parse_attrib_res(bytes).map(ActivationParam::IsoDepPollB)
            }
            (RfInterface::NfcDep, mode) if mode.is_poll() => {
                parse_atr_res(bytes).map(ActivationParam::NfcDepPoll)
            }
            (RfInterface::NfcDep, _) => parse_atr_req(bytes).map(ActivationParam::NfcDepListen),
            _ => None,
        }
    }
}

fn parse_ats(b: &[u8]) -> Option<IsoDepPollA> {
    let len = usize::from(*b.first()?);
    let ats = b.get(1..1 + len)?;
    // TL, T0, then TA/TB/TC as announced by T0, then historical bytes.
    let t0 = *ats.get(1)?;
    let mut at = 2;
    for bit in [0x10, 0x20, 0x40] {
        if t0 & bit != 0 {
            at += 1;
        }
    }
    Some(IsoDepPollA { fsc: fsc_from_fsci(t0 & 0x0f), t1: ats.get(at..)?.to_vec() })
}

fn parse_attrib_res(b: &[u8]) -> Option<IsoDepPollB> {
    let len = usize::from(*b.first()?);
    let attrib = b.get(1..1 + len)?;
    Some(IsoDepPollB { mbli: attrib.first()? >> 4, hlr: attrib.get(1..)?.to_vec() })
}

fn parse_atr_res(b: &[u8]) -> Option<NfcDepPoll> {
    let len = usize::from(*b.first()?);
    let atr = b.get(1..1 + len)?;
    if atr.len() < 15 {
        return None;
    }
    Some(NfcDepPoll {
        nfcid3: atr[0..10].try_into().ok()?,
        did: atr[10],
        bs: atr[11],
        br: atr[12],
        to: atr[13],
        pp: atr[14],
        g: atr[15..].to_vec(),
    })
}

fn parse_atr_req(b: &[u8]) -> Option<NfcDepListen> {
    let len = usize::from(*b.first()?);
    let atr = b.get(1..1 + len)?;
    if atr.len() < 14 {
        return None;
    }
    Some(NfcDepListen {
        nfcid3: atr[0..10].try_into().ok()?,
        did: atr[10],
        bs: atr[11],
        br: atr[12],
        pp: atr[13],
        g: atr[14..].to_vec(),
    })
}

/// RF interface activation notification delivered by the NCI core.
#[derive(Clone, Debug)]
pub struct IntfActivated {
    pub discovery_id: u8,
    pub rf_intf: RfInterface,
    pub protocol: RfProtocol,
    pub mode: RfMode,
    pub mode_param_bytes: Bytes,
    pub mode_param: Option<ModeParam>,
    pub activation_param_bytes: Bytes,
    pub activation_param: Option<ActivationParam>,
}

impl IntfActivated {
    /// Build a notification from the raw parameter bytes, decoding both
    /// parameter blocks along the way.
    pub fn new(
        discovery_id: u8,
        rf_intf: RfInterface,
        protocol: RfProtocol,
        mode: RfMode,
        mode_param_bytes: Bytes,
        activation_param_bytes: Bytes,
    ) -> IntfActivated {
        let mode_param = ModeParam::parse(mode, &mode_param_bytes);
        let activation_param = ActivationParam::parse(rf_intf, mode, &activation_param_bytes);
        IntfActivated {
            discovery_id,
            rf_intf,
            protocol,
            mode,
            mode_param_bytes,
            mode_param,
            activation_param_bytes,
            activation_param,
        }
    }

    pub fn poll_a(&self) -> Option<&PollA> {
        match &self.mode_param {
            Some(ModeParam::PollA(p)) => Some(p),
            _ => None,
        }
    }

    pub fn poll_b(&self) -> Option<&PollB> {
        match &self.mode_param {
            Some(ModeParam::PollB(p)) => Some(p),
            _ => None,
        }
    }

    pub fn poll_f(&self) -> Option<&PollF> {
        match &self.mode_param {
            Some(ModeParam::PollF(p)) => Some(p),
            _ => None,
        }
    }
}
