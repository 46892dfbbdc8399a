//! Activation snapshot and the endpoint match predicate
//! Decides whether a fresh activation is the same physical
//! endpoint as the one seen before an RF loss.

use crate::nci::types::{IntfActivated, ModeParam, PollA, PollB, RfInterface, RfMode, RfProtocol};
use bytes::Bytes;

// First NFCID1 byte of a 4-byte random UID, Digital Protocol 4.8.2.
const NFCID1_RANDOM: u8 = 0x08;

/// Deep copy of the identifying fields of an interface activation.
#[derive(Clone, Debug)]
pub struct IntfInfo {
    pub rf_intf: RfInterface,
    pub protocol: RfProtocol,
    pub mode: RfMode,
    pub mode_param_bytes: Bytes,
    pub mode_param: Option<ModeParam>,
    pub activation_param_bytes: Bytes,
}

impl IntfInfo {
    pub fn new(ntf: &IntfActivated) -> IntfInfo {
        IntfInfo {
            rf_intf: ntf.rf_intf,
            protocol: ntf.protocol,
            mode: ntf.mode,
            mode_param_bytes: ntf.mode_param_bytes.clone(),
            mode_param: ntf.mode_param.clone(),
            activation_param_bytes: ntf.activation_param_bytes.clone(),
        }
    }

    /// True if `ntf` activates the same physical endpoint this snapshot
    /// was taken from. Identifiers the remote may regenerate after an RF
    /// loss (random NFCID1, Type-B UID) do not take part in the
    /// comparison; everything else must match byte for byte.
    pub fn matches(&self, ntf: &IntfActivated) -> bool {
        if self.rf_intf != ntf.rf_intf || self.protocol != ntf.protocol || self.mode != ntf.mode {
            return false;
        }
        let mode_param_ok = match (self.mode, self.rf_intf, &self.mode_param, &ntf.mode_param) {
            (
                RfMode::PassivePollA,
                RfInterface::Frame | RfInterface::IsoDep,
                Some(ModeParam::PollA(old)),
                Some(ModeParam::PollA(new)),
            ) => poll_a_same_endpoint(old, new),
            (
                RfMode::PassivePollB,
                RfInterface::IsoDep,
                Some(ModeParam::PollB(old)),
                Some(ModeParam::PollB(new)),
            ) => poll_b_same_endpoint(old, new),
            _ => self.mode_param_bytes == ntf.mode_param_bytes,
        };
        mode_param_ok && self.activation_param_bytes == ntf.activation_param_bytes
    }
}

fn poll_a_same_endpoint(old: &PollA, new: &PollA) -> bool {
    if old.sel_res != new.sel_res
        || old.sel_res_len != new.sel_res_len
        || old.sens_res != new.sens_res
        || old.nfcid1.len() != new.nfcid1.len()
    {
        return false;
    }
    if old.nfcid1.len() == 4
        && old.nfcid1[0] == NFCID1_RANDOM
        && new.nfcid1[0] == NFCID1_RANDOM
    {
        // Random UID, regenerated on every activation.
        return true;
    }
    old.nfcid1 == new.nfcid1
}

fn poll_b_same_endpoint(old: &PollB, new: &PollB) -> bool {
    // NFCID0 may be regenerated after an RF loss and is ignored.
    old.fsc == new.fsc && old.app_data == new.app_data && old.prot_info == new.prot_info
}
