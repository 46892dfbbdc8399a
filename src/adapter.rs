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

//! The adapter reconciles the NCI RF state machine with the framework's
//! endpoint model: it turns interface activations into tags, peers and
//! card emulation hosts, keeps an endpoint alive across brief RF losses
//! and routes application data through the target data path.

use crate::detect::{detect_listen, detect_poll, ListenEndpoint, PollEndpoint};
use crate::error::AdapterError;
use crate::framework::{
    AdapterParam, Framework, ObjectId, OpModes, SequenceFlags, TransmitId, TransmitStatus,
};
use crate::intf::IntfInfo;
use crate::nci::types::{
    IntfActivated, NciOpMask, NciParam, NciState, RfProtocol, TechMask, Technology,
    MAX_NFCID1_LEN,
};
use crate::nci::{NciCommand, NciEvent, NciHandle, SendHandle};
use crate::target::{Target, TransmitKind, TransmitOutcome, TransmitTimeout};
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::select;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Duration, Instant};

/// Liveness probe period for activated tags.
pub const PRESENCE_CHECK_PERIOD: Duration = Duration::from_millis(250);

/// How long a card emulation host waits for the external reader to
/// come back after an RF loss.
pub const CE_REACTIVATION_TIMEOUT: Duration = Duration::from_millis(1500);

/// Internal adapter states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalState {
    Idle,
    HaveTarget,
    HaveInitiator,
    ReactivatingTarget,
    ReactivatingCe,
    ReactivatedCe,
}

/// Inputs of the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SmEvent {
    /// Activation matching the stored interface info.
    MatchingActivation,
    /// Activation of a different physical endpoint.
    ForeignActivation,
    /// NCI left the active state.
    Deactivation,
    /// The CE reactivation window closed.
    CeTimeout,
}

/// Effects the interpreter applies for a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SmAction {
    Detect,
    DropTargetThenDetect,
    DropInitiatorThenDetect,
    TargetReactivated,
    CeReactivated,
    InitiatorKeptAlive,
    DropTargetToIdle,
    DropInitiatorToIdle,
    EnterCeReactivation,
    ReenterCeReactivation,
    Stay,
}

/// The transition table. `has_host` tells whether a card emulation
/// host is registered on the current initiator.
pub(crate) fn transition(state: InternalState, event: SmEvent, has_host: bool) -> SmAction {
    use InternalState::*;
    use SmAction::*;
    use SmEvent::*;
    match (state, event) {
        (Idle, MatchingActivation | ForeignActivation) => Detect,
        (Idle, Deactivation | CeTimeout) => Stay,
        // A matching activation cannot normally reach HaveTarget (the
        // deactivation is seen first); a stale target is dropped either way.
        (HaveTarget, MatchingActivation | ForeignActivation) => DropTargetThenDetect,
        (HaveTarget, Deactivation) => DropTargetToIdle,
        (HaveInitiator, MatchingActivation) if has_host => CeReactivated,
        (HaveInitiator, MatchingActivation) => InitiatorKeptAlive,
        (HaveInitiator, ForeignActivation) => DropInitiatorThenDetect,
        (HaveInitiator, Deactivation) if has_host => EnterCeReactivation,
        (HaveInitiator, Deactivation) => DropInitiatorToIdle,
        (ReactivatingTarget, MatchingActivation) => TargetReactivated,
        (ReactivatingTarget, ForeignActivation) => DropTargetThenDetect,
        (ReactivatingTarget, Deactivation) => Stay,
        (ReactivatingCe, MatchingActivation) => CeReactivated,
        (ReactivatingCe, ForeignActivation) => DropInitiatorThenDetect,
        // NCI cycling through discovery keeps the technology locked.
        (ReactivatingCe, Deactivation) => Stay,
        (ReactivatingCe, CeTimeout) => DropInitiatorToIdle,
        (ReactivatedCe, MatchingActivation) => CeReactivated,
        (ReactivatedCe, ForeignActivation) => DropInitiatorThenDetect,
        (ReactivatedCe, Deactivation) => ReenterCeReactivation,
        (_, CeTimeout) => Stay,
    }
}

/// Requests submitted to the adapter loop by the framework layer.
#[derive(Debug)]
pub enum AdapterRequest {
    SubmitModeRequest { modes: OpModes, reply: oneshot::Sender<bool> },
    CancelModeRequest,
    SetAllowedTechs(TechMask),
    SetEnabled(bool),
    SetPowered(bool),
    Transmit { data: Bytes, reply: oneshot::Sender<Result<TransmitId, AdapterError>> },
    CancelTransmit(TransmitId),
    Reactivate { reply: oneshot::Sender<bool> },
    DeactivateTarget,
    DeactivateInitiator,
    GetParam { param: AdapterParam, reply: oneshot::Sender<Option<Bytes>> },
    SetParams { params: Vec<(AdapterParam, Bytes)>, reset: bool },
    /// The framework destroyed one of its objects; the matching weak
    /// reference is cleared.
    ObjectDestroyed(ObjectId),
    Shutdown,
}

/// Listen side endpoint the adapter owns while an external reader
/// talks to us.
struct Initiator {
    id: ObjectId,
    tech: Technology,
}

/// Glue state machine between the NCI core and the framework layer.
pub struct Adapter<F: Framework> {
    framework: F,
    nci: NciHandle,

    state: InternalState,
    nci_current: NciState,
    nci_next: NciState,
    active_intf: Option<IntfInfo>,
    target: Option<Target>,
    initiator: Option<Initiator>,
    // Weak observations of framework owned objects.
    tag: Option<ObjectId>,
    peer: Option<ObjectId>,
    host: Option<ObjectId>,

    desired_mode: OpModes,
    current_mode: OpModes,
    mode_change_pending: bool,
    mode_check_scheduled: bool,

    supported_techs: TechMask,
    active_techs: TechMask,
    active_tech_mask: TechMask,

    presence_deadline: Option<Instant>,
    presence_check_id: Option<TransmitId>,
    ce_deadline: Option<Instant>,
    transmit_deadline: Option<Instant>,

    transmit_seq: u64,
    send_seq: u64,
    enabled: bool,
    powered: bool,
}

impl<F: Framework> Adapter<F> {
    pub fn new(framework: F, nci: NciHandle, supported_techs: TechMask) -> Adapter<F> {
        Adapter {
            framework,
            nci,
            state: InternalState::Idle,
            nci_current: NciState::Idle,
            nci_next: NciState::Idle,
            active_intf: None,
            target: None,
            initiator: None,
            tag: None,
            peer: None,
            host: None,
            desired_mode: OpModes::empty(),
            current_mode: OpModes::empty(),
            mode_change_pending: false,
            mode_check_scheduled: false,
            supported_techs,
            active_techs: supported_techs,
            active_tech_mask: TechMask::ALL,
            presence_deadline: None,
            presence_check_id: None,
            ce_deadline: None,
            transmit_deadline: None,
            transmit_seq: 0,
            send_seq: 0,
            enabled: false,
            powered: false,
        }
    }

    pub fn internal_state(&self) -> InternalState {
        self.state
    }

    pub fn current_mode(&self) -> OpModes {
        self.current_mode
    }

    pub fn active_tech_mask(&self) -> TechMask {
        self.active_tech_mask
    }

    pub fn presence_check_armed(&self) -> bool {
        self.presence_deadline.is_some()
    }

    pub fn ce_timer_armed(&self) -> bool {
        self.ce_deadline.is_some()
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    pub fn has_initiator(&self) -> bool {
        self.initiator.is_some()
    }

    // ---- NCI events ----

    /// Dispatch one event from the NCI core.
    pub fn nci_event(&mut self, event: NciEvent) {
        match event {
            NciEvent::CurrentState(state) => self.nci_current_state(state),
            NciEvent::NextState(state) => self.nci_next_state(state),
            NciEvent::IntfActivated(ntf) => self.intf_activated(ntf),
            NciEvent::DataPacket { conn_id, data } => self.data_packet(conn_id, data),
            NciEvent::SendComplete { handle, ok } => self.send_complete(handle, ok),
            NciEvent::ParamChanged(param) => self.nci_param_changed(param),
        }
    }

    pub fn nci_current_state(&mut self, state: NciState) {
        self.nci_current = state;
        self.state_check();
    }

    pub fn nci_next_state(&mut self, state: NciState) {
        self.nci_next = state;
        if matches!(state, NciState::Idle | NciState::Discovery)
            && self.nci_current.is_active()
            && self.state != InternalState::Idle
        {
            self.deactivated();
        }
        self.state_check();
    }

    /// Entry point of the state machine for activation notifications.
    pub fn intf_activated(&mut self, ntf: IntfActivated) {
        // Any activation closes a pending CE reactivation window.
        self.ce_deadline = None;
        let event = match &self.active_intf {
            Some(info) if info.matches(&ntf) => SmEvent::MatchingActivation,
            _ => SmEvent::ForeignActivation,
        };
        match transition(self.state, event, self.host.is_some()) {
            SmAction::Detect => self.detect(ntf),
            SmAction::DropTargetThenDetect => {
                self.drop_target();
                self.detect(ntf);
            }
            SmAction::DropInitiatorThenDetect => {
                self.drop_initiator();
                self.detect(ntf);
            }
            SmAction::TargetReactivated => {
                self.state = InternalState::HaveTarget;
                self.active_intf = Some(IntfInfo::new(&ntf));
                if let Some(id) = self.tag.or(self.peer) {
                    self.framework.reactivated(id);
                }
                if ntf.protocol != RfProtocol::NfcDep {
                    self.start_presence_check();
                }
            }
            SmAction::CeReactivated => {
                self.state = InternalState::ReactivatedCe;
                self.active_intf = Some(IntfInfo::new(&ntf));
                if let Some(initiator) = &self.initiator {
                    self.framework.reactivated(initiator.id);
                }
            }
            SmAction::InitiatorKeptAlive => debug!("keeping initiator alive"),
            _ => {}
        }
    }

    pub fn data_packet(&mut self, conn_id: u8, data: Bytes) {
        let Some(target) = self.target.as_mut() else { return };
        if let Some(out) = target.on_data_packet(conn_id, &data) {
            self.route_outcome(out);
        }
    }

    pub fn send_complete(&mut self, handle: SendHandle, ok: bool) {
        let Some(target) = self.target.as_mut() else { return };
        if let Some(out) = target.on_send_complete(handle, ok) {
            self.route_outcome(out);
        }
    }

    fn nci_param_changed(&mut self, param: NciParam) {
        match param {
            NciParam::LaNfcid1 => self.framework.param_changed(AdapterParam::LaNfcid1),
        }
    }

    // ---- state machine internals ----

    fn deactivated(&mut self) {
        match transition(self.state, SmEvent::Deactivation, self.host.is_some()) {
            SmAction::DropTargetToIdle => {
                self.drop_target();
            }
            SmAction::DropInitiatorToIdle => {
                self.drop_initiator();
            }
            SmAction::EnterCeReactivation => self.enter_ce_reactivation(true),
            SmAction::ReenterCeReactivation => self.enter_ce_reactivation(false),
            _ => {}
        }
    }

    fn detect(&mut self, ntf: IntfActivated) {
        if let Some(target) = Target::new(self.nci.clone(), &ntf) {
            match detect_poll(&mut self.framework, &ntf) {
                Some(PollEndpoint::Tag(id)) => self.tag = Some(id),
                Some(PollEndpoint::Peer(id)) => self.peer = Some(id),
                None => {
                    info!("no factory accepted the {:?} activation", ntf.mode);
                    self.nci.send(NciCommand::SetState(NciState::Idle));
                    return;
                }
            }
            self.target = Some(target);
            self.state = InternalState::HaveTarget;
            let probed = ntf.protocol != RfProtocol::NfcDep;
            self.active_intf = Some(IntfInfo::new(&ntf));
            if probed {
                self.start_presence_check();
            }
        } else {
            let Some(tech) = ntf.mode.technology() else {
                info!("no usable technology in the {:?} activation", ntf.mode);
                self.nci.send(NciCommand::SetState(NciState::Idle));
                return;
            };
            let Some(initiator_id) = self.framework.initiator(tech) else {
                self.nci.send(NciCommand::SetState(NciState::Idle));
                return;
            };
            match detect_listen(&mut self.framework, initiator_id, &ntf) {
                Some(ListenEndpoint::Peer(id)) => self.peer = Some(id),
                Some(ListenEndpoint::Host(id)) => self.host = Some(id),
                None => {
                    info!("no factory accepted the {:?} activation", ntf.mode);
                    self.framework.gone(initiator_id);
                    self.nci.send(NciCommand::SetState(NciState::Idle));
                    return;
                }
            }
            self.initiator = Some(Initiator { id: initiator_id, tech });
            self.active_intf = Some(IntfInfo::new(&ntf));
            self.state = InternalState::HaveInitiator;
        }
    }

    /// Weak references are cleared ahead of the owning objects.
    fn drop_target(&mut self) {
        if let Some(id) = self.tag.take() {
            self.framework.gone(id);
        }
        if let Some(id) = self.peer.take() {
            self.framework.gone(id);
        }
        self.presence_deadline = None;
        self.presence_check_id = None;
        if let Some(mut target) = self.target.take() {
            if let Some(out) = target.abort_transmit() {
                if out.kind == TransmitKind::User {
                    self.framework.transmit_done(out.id, TransmitStatus::Error, &[]);
                }
            }
            info!("target is gone");
        }
        self.transmit_deadline = None;
        self.active_intf = None;
        self.state = InternalState::Idle;
    }

    fn drop_initiator(&mut self) {
        if let Some(id) = self.peer.take() {
            self.framework.gone(id);
        }
        if let Some(id) = self.host.take() {
            self.framework.gone(id);
        }
        self.ce_deadline = None;
        if let Some(initiator) = self.initiator.take() {
            self.framework.gone(initiator.id);
            info!("initiator is gone");
        }
        if self.active_tech_mask != TechMask::ALL {
            self.active_tech_mask = TechMask::ALL;
            self.nci.send(NciCommand::SetTechs(self.active_techs));
        }
        self.active_intf = None;
        self.state = InternalState::Idle;
    }

    fn enter_ce_reactivation(&mut self, lock_tech: bool) {
        self.state = InternalState::ReactivatingCe;
        self.ce_deadline = Some(Instant::now() + CE_REACTIVATION_TIMEOUT);
        if !lock_tech {
            return;
        }
        let ce_tech = match self.initiator.as_ref().map(|i| i.tech) {
            Some(Technology::A) => TechMask::A_LISTEN,
            Some(Technology::B) => TechMask::B_LISTEN,
            _ => TechMask::empty(),
        };
        if !ce_tech.is_empty() {
            // The external reader only recognizes the emulated card if
            // it comes back on the very same listen technology.
            self.active_tech_mask = ce_tech;
            self.nci.send(NciCommand::SetTechs(self.active_techs & ce_tech));
        }
    }

    pub(crate) fn ce_timeout(&mut self) {
        self.ce_deadline = None;
        if transition(self.state, SmEvent::CeTimeout, self.host.is_some())
            == SmAction::DropInitiatorToIdle
        {
            info!("card emulation reactivation timed out");
            self.drop_initiator();
        }
    }

    /// After every NCI state change: recover discovery if the state
    /// machine settled in IDLE underneath an active mode request.
    fn state_check(&mut self) {
        if self.enabled
            && self.powered
            && self.nci_current == NciState::Idle
            && self.nci_next == NciState::Idle
            && !self.desired_mode.is_empty()
        {
            self.nci.send(NciCommand::SetState(NciState::Discovery));
        }
        self.schedule_mode_check();
    }

    // ---- mode and technology management ----

    pub fn submit_mode_request(&mut self, modes: OpModes) -> bool {
        self.desired_mode = modes;
        let mask = nci_op_mask(modes);
        self.nci.send(NciCommand::SetOpMask(mask));
        if !mask.is_empty() && self.powered {
            self.nci.send(NciCommand::SetState(NciState::Discovery));
        }
        self.mode_change_pending = true;
        self.schedule_mode_check();
        true
    }

    pub fn cancel_mode_request(&mut self) {
        self.desired_mode = OpModes::empty();
        self.nci.send(NciCommand::SetOpMask(NciOpMask::empty()));
        self.mode_change_pending = true;
        self.schedule_mode_check();
    }

    fn schedule_mode_check(&mut self) {
        self.mode_check_scheduled = true;
    }

    /// Coalesced mode check, run when the loop goes idle.
    pub fn run_mode_check(&mut self) {
        if !self.mode_check_scheduled {
            return;
        }
        self.mode_check_scheduled = false;
        let effective = if self.nci_current > NciState::Idle {
            self.desired_mode
        } else {
            OpModes::empty()
        };
        if self.mode_change_pending {
            if effective == self.desired_mode {
                self.mode_change_pending = false;
                self.current_mode = effective;
                self.framework.mode_changed(effective, true);
            }
        } else if self.current_mode != effective {
            self.current_mode = effective;
            self.framework.mode_changed(effective, false);
        }
    }

    pub fn get_supported_techs(&self) -> TechMask {
        self.supported_techs & (TechMask::A | TechMask::B | TechMask::F)
    }

    pub fn set_allowed_techs(&mut self, requested: TechMask) {
        let abf = TechMask::A | TechMask::B | TechMask::F;
        self.active_techs = (self.supported_techs & !abf) | (self.supported_techs & requested & abf);
        self.nci.send(NciCommand::SetTechs(self.active_techs & self.active_tech_mask));
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.state_check();
    }

    pub fn set_powered(&mut self, powered: bool) {
        self.powered = powered;
        if powered {
            self.state_check();
            return;
        }
        if self.target.is_some() {
            self.drop_target();
        }
        if self.initiator.is_some() {
            self.drop_initiator();
        }
        self.nci.send(NciCommand::SetState(NciState::Idle));
    }

    // ---- endpoint lifecycle requests ----

    /// Deliberate reselection of the active target, e.g. to reset a
    /// tag. Only allowed while the RF state is stable and active.
    pub fn reactivate(&mut self) -> bool {
        let stable = (self.nci_current == NciState::PollActive
            && self.nci_next == NciState::PollActive)
            || (self.nci_current == NciState::ListenActive
                && self.nci_next == NciState::ListenActive);
        if self.state != InternalState::HaveTarget || self.active_intf.is_none() || !stable {
            warn!("reactivation is not possible in {:?}/{:?}", self.state, self.nci_current);
            return false;
        }
        self.state = InternalState::ReactivatingTarget;
        // Presence checks pause until the endpoint is re-seen.
        self.presence_deadline = None;
        self.nci.send(NciCommand::SetState(NciState::Discovery));
        true
    }

    pub fn deactivate_target(&mut self) {
        if self.target.is_none() {
            return;
        }
        self.drop_target();
        if self.powered {
            self.nci.send(NciCommand::SetState(NciState::Discovery));
        }
    }

    pub fn deactivate_initiator(&mut self) {
        if self.initiator.is_none() {
            return;
        }
        self.drop_initiator();
        if self.powered {
            self.nci.send(NciCommand::SetState(NciState::Discovery));
        }
    }

    pub fn object_destroyed(&mut self, id: ObjectId) {
        if self.tag == Some(id) {
            self.tag = None;
        }
        if self.peer == Some(id) {
            self.peer = None;
        }
        if self.host == Some(id) {
            self.host = None;
        }
    }

    /// Sever the data path before the adapter goes away; outstanding
    /// transmissions complete with an error.
    pub fn shutdown(&mut self) {
        if self.target.is_some() {
            self.drop_target();
        }
        if self.initiator.is_some() {
            self.drop_initiator();
        }
    }

    // ---- target data path ----

    pub fn transmit(&mut self, data: Bytes) -> Result<TransmitId, AdapterError> {
        self.start_transmit(TransmitKind::User, data)
    }

    pub fn cancel_transmit(&mut self, id: TransmitId) {
        if let Some(target) = self.target.as_mut() {
            if target.current_user_transmit() == Some(id) {
                target.cancel_transmit();
                self.transmit_deadline = None;
            }
        }
    }

    fn start_transmit(&mut self, kind: TransmitKind, data: Bytes) -> Result<TransmitId, AdapterError> {
        if self.target.is_none() {
            return Err(AdapterError::NoTarget);
        }
        self.transmit_seq += 1;
        let id = TransmitId(self.transmit_seq);
        self.send_seq += 1;
        let handle = SendHandle(self.send_seq);
        let target = self.target.as_mut().ok_or(AdapterError::NoTarget)?;
        target.transmit(id, kind, handle, data)?;
        if let TransmitTimeout::Fixed(timeout) = target.timeout() {
            self.transmit_deadline = Some(Instant::now() + timeout);
        }
        Ok(id)
    }

    fn route_outcome(&mut self, out: TransmitOutcome) {
        self.transmit_deadline = None;
        match out.kind {
            TransmitKind::User => {
                self.framework.transmit_done(out.id, out.status, &out.payload);
            }
            TransmitKind::Presence => {
                if self.presence_check_id == Some(out.id) {
                    self.presence_check_id = None;
                }
                if out.status != TransmitStatus::Ok {
                    info!("presence check failed, dropping the target");
                    self.drop_target();
                    if self.powered {
                        self.nci.send(NciCommand::SetState(NciState::Discovery));
                    }
                }
            }
        }
    }

    pub(crate) fn transmit_timeout(&mut self) {
        self.transmit_deadline = None;
        let Some(target) = self.target.as_mut() else { return };
        info!("transmission timed out");
        if let Some(out) = target.abort_transmit() {
            self.route_outcome(out);
        }
    }

    // ---- presence checks ----

    fn start_presence_check(&mut self) {
        self.presence_deadline = Some(Instant::now() + PRESENCE_CHECK_PERIOD);
    }

    pub(crate) fn presence_tick(&mut self) {
        if self.target.is_none() {
            self.presence_deadline = None;
            return;
        }
        self.presence_deadline = Some(Instant::now() + PRESENCE_CHECK_PERIOD);
        if self.presence_check_id.is_some() {
            return;
        }
        if let Some(endpoint) = self.tag.or(self.peer) {
            if self
                .framework
                .sequence_flags(endpoint)
                .contains(SequenceFlags::NO_PRESENCE_CHECKS)
            {
                return;
            }
        }
        let probe = {
            let Some(target) = self.target.as_ref() else { return };
            if target.busy() {
                return;
            }
            match target.presence_probe() {
                Some(probe) => probe,
                None => return,
            }
        };
        match self.start_transmit(TransmitKind::Presence, probe) {
            Ok(id) => self.presence_check_id = Some(id),
            Err(e) => {
                info!("failed to start a presence check: {}", e);
                self.presence_deadline = None;
                if self.powered {
                    self.nci.send(NciCommand::SetState(NciState::Discovery));
                }
            }
        }
    }

    // ---- parameter pass-through ----

    pub fn list_params(&self) -> &'static [AdapterParam] {
        &[AdapterParam::LaNfcid1]
    }

    pub fn get_param(&self, param: AdapterParam) -> Option<Bytes> {
        match param {
            AdapterParam::LaNfcid1 => self
                .nci
                .param(NciParam::LaNfcid1)
                .map(|v| v.slice(..v.len().min(MAX_NFCID1_LEN))),
        }
    }

    pub fn set_params(&mut self, params: &[(AdapterParam, Bytes)], reset: bool) {
        let params = params
            .iter()
            .map(|(param, value)| match param {
                AdapterParam::LaNfcid1 => (NciParam::LaNfcid1, value.clone()),
            })
            .collect();
        self.nci.send(NciCommand::SetParams { params, reset });
    }

    // ---- event loop ----

    fn request(&mut self, request: AdapterRequest) -> bool {
        match request {
            AdapterRequest::SubmitModeRequest { modes, reply } => {
                let _ = reply.send(self.submit_mode_request(modes));
            }
            AdapterRequest::CancelModeRequest => self.cancel_mode_request(),
            AdapterRequest::SetAllowedTechs(mask) => self.set_allowed_techs(mask),
            AdapterRequest::SetEnabled(enabled) => self.set_enabled(enabled),
            AdapterRequest::SetPowered(powered) => self.set_powered(powered),
            AdapterRequest::Transmit { data, reply } => {
                let _ = reply.send(self.transmit(data));
            }
            AdapterRequest::CancelTransmit(id) => self.cancel_transmit(id),
            AdapterRequest::Reactivate { reply } => {
                let _ = reply.send(self.reactivate());
            }
            AdapterRequest::DeactivateTarget => self.deactivate_target(),
            AdapterRequest::DeactivateInitiator => self.deactivate_initiator(),
            AdapterRequest::GetParam { param, reply } => {
                let _ = reply.send(self.get_param(param));
            }
            AdapterRequest::SetParams { params, reset } => self.set_params(&params, reset),
            AdapterRequest::ObjectDestroyed(id) => self.object_destroyed(id),
            AdapterRequest::Shutdown => return false,
        }
        true
    }

    /// Main adapter routine: processes NCI events, framework requests
    /// and the deferred work deadlines until either channel closes or a
    /// shutdown request arrives.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<NciEvent>,
        mut requests: UnboundedReceiver<AdapterRequest>,
    ) {
        loop {
            self.run_mode_check();
            select! {
                event = events.recv() => match event {
                    Some(event) => self.nci_event(event),
                    None => break,
                },
                request = requests.recv() => match request {
                    Some(request) => if !self.request(request) { break },
                    None => break,
                },
                _ = deadline(self.presence_deadline), if self.presence_deadline.is_some() => {
                    self.presence_tick();
                }
                _ = deadline(self.ce_deadline), if self.ce_deadline.is_some() => {
                    self.ce_timeout();
                }
                _ = deadline(self.transmit_deadline), if self.transmit_deadline.is_some() => {
                    self.transmit_timeout();
                }
            }
        }
        self.shutdown();
        debug!("adapter loop is terminated");
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Operating modes to NCI discovery operations.
fn nci_op_mask(modes: OpModes) -> NciOpMask {
    let mut mask = NciOpMask::empty();
    if modes.contains(OpModes::READER_WRITER) {
        mask |= NciOpMask::RW | NciOpMask::POLL;
    }
    if modes.contains(OpModes::P2P_INITIATOR) {
        mask |= NciOpMask::PEER | NciOpMask::POLL;
    }
    if modes.contains(OpModes::P2P_TARGET) {
        mask |= NciOpMask::PEER | NciOpMask::LISTEN;
    }
    if modes.contains(OpModes::CARD_EMULATION) {
        mask |= NciOpMask::CE | NciOpMask::LISTEN;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{
        ParamIsoDepPollA, ParamIsoDepPollB, ParamNfcDep, ParamPollA, ParamPollB, ParamPollF,
        TagTechParams,
    };
    use crate::nci::types::{RfInterface, RfMode};
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Default)]
    struct TestFw {
        calls: Vec<String>,
        refuse_factories: bool,
        seq_flags: SequenceFlags,
        next_id: u64,
    }

    impl TestFw {
        fn make(&mut self, name: &str) -> Option<ObjectId> {
            self.calls.push(name.to_string());
            if self.refuse_factories {
                None
            } else {
                self.next_id += 1;
                Some(ObjectId(self.next_id))
            }
        }
    }

    impl Framework for TestFw {
        fn tag_t2(&mut self, poll_a: ParamPollA) -> Option<ObjectId> {
            let name = format!("tag_t2:{:02x?}", poll_a.nfcid1);
            self.make(&name)
        }
        fn tag_t4a(&mut self, _: ParamPollA, _: ParamIsoDepPollA) -> Option<ObjectId> {
            self.make("tag_t4a")
        }
        fn tag_t4b(&mut self, _: ParamPollB, _: ParamIsoDepPollB) -> Option<ObjectId> {
            self.make("tag_t4b")
        }
        fn tag_other(&mut self, _: TagTechParams) -> Option<ObjectId> {
            self.make("tag_other")
        }
        fn peer_initiator_a(
            &mut self,
            _: Option<ParamPollA>,
            _: ParamNfcDep,
        ) -> Option<ObjectId> {
            self.make("peer_initiator_a")
        }
        fn peer_initiator_f(
            &mut self,
            _: Option<ParamPollF>,
            _: ParamNfcDep,
        ) -> Option<ObjectId> {
            self.make("peer_initiator_f")
        }
        fn initiator(&mut self, tech: Technology) -> Option<ObjectId> {
            let name = format!("initiator:{:?}", tech);
            self.make(&name)
        }
        fn peer_target(
            &mut self,
            _: ObjectId,
            _: Technology,
            _: Option<ParamNfcDep>,
        ) -> Option<ObjectId> {
            self.make("peer_target")
        }
        fn host(&mut self, _: ObjectId) -> Option<ObjectId> {
            self.make("host")
        }
        fn gone(&mut self, id: ObjectId) {
            self.calls.push(format!("gone:{}", id.0));
        }
        fn reactivated(&mut self, id: ObjectId) {
            self.calls.push(format!("reactivated:{}", id.0));
        }
        fn transmit_done(&mut self, id: TransmitId, status: TransmitStatus, payload: &[u8]) {
            self.calls.push(format!("transmit_done:{}:{:?}:{:02x?}", id.0, status, payload));
        }
        fn mode_changed(&mut self, modes: OpModes, confirmed: bool) {
            self.calls.push(format!("mode:{:#04x}:{}", modes.bits(), confirmed));
        }
        fn param_changed(&mut self, param: AdapterParam) {
            self.calls.push(format!("param:{:?}", param));
        }
        fn sequence_flags(&self, _: ObjectId) -> SequenceFlags {
            self.seq_flags
        }
    }

    fn adapter() -> (Adapter<TestFw>, UnboundedReceiver<NciCommand>) {
        let (nci, cmd_rx) = NciHandle::new();
        let mut adapter = Adapter::new(TestFw::default(), nci, TechMask::ALL);
        adapter.set_enabled(true);
        adapter.set_powered(true);
        (adapter, cmd_rx)
    }

    fn drain(rx: &mut UnboundedReceiver<NciCommand>) -> Vec<NciCommand> {
        let mut cmds = vec![];
        while let Ok(cmd) = rx.try_recv() {
            cmds.push(cmd);
        }
        cmds
    }

    fn t2_activation() -> IntfActivated {
        IntfActivated::new(
            1,
            RfInterface::Frame,
            RfProtocol::T2t,
            RfMode::PassivePollA,
            Bytes::from_static(&[
                0x44, 0x00, 0x07, 0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x01, 0x00,
            ]),
            Bytes::new(),
        )
    }

    fn t4a_activation() -> IntfActivated {
        IntfActivated::new(
            1,
            RfInterface::IsoDep,
            RfProtocol::IsoDep,
            RfMode::PassivePollA,
            Bytes::from_static(&[0x04, 0x00, 0x04, 0x04, 0x01, 0x02, 0x03, 0x01, 0x20]),
            Bytes::from_static(&[0x02, 0x02, 0x08]),
        )
    }

    fn ce_activation() -> IntfActivated {
        IntfActivated::new(
            1,
            RfInterface::IsoDep,
            RfProtocol::IsoDep,
            RfMode::PassiveListenA,
            Bytes::new(),
            Bytes::new(),
        )
    }

    fn rf_active(adapter: &mut Adapter<TestFw>, state: NciState) {
        adapter.nci_next_state(state);
        adapter.nci_current_state(state);
    }

    fn assert_invariants(adapter: &Adapter<TestFw>) {
        assert!(!(adapter.target.is_some() && adapter.initiator.is_some()));
        assert_eq!(adapter.active_intf.is_some(), adapter.state != InternalState::Idle);
        if adapter.ce_deadline.is_some() {
            assert_eq!(adapter.state, InternalState::ReactivatingCe);
        }
        if adapter.active_tech_mask != TechMask::ALL {
            assert!(adapter.initiator.is_some());
        }
        if adapter.tag.is_some() || adapter.peer.is_some() || adapter.host.is_some() {
            assert!(adapter.target.is_some() || adapter.initiator.is_some());
        }
        if adapter.presence_deadline.is_some() {
            assert!(adapter.target.is_some());
        }
    }

    #[test]
    fn transition_table() {
        use InternalState::*;
        use SmAction::*;
        use SmEvent::*;
        for has_host in [false, true] {
            assert_eq!(transition(Idle, ForeignActivation, has_host), Detect);
            assert_eq!(transition(HaveTarget, ForeignActivation, has_host), DropTargetThenDetect);
            assert_eq!(transition(HaveTarget, Deactivation, has_host), DropTargetToIdle);
            assert_eq!(
                transition(ReactivatingTarget, MatchingActivation, has_host),
                TargetReactivated
            );
            assert_eq!(
                transition(ReactivatingTarget, ForeignActivation, has_host),
                DropTargetThenDetect
            );
            assert_eq!(transition(ReactivatingCe, MatchingActivation, has_host), CeReactivated);
            assert_eq!(transition(ReactivatingCe, Deactivation, has_host), Stay);
            assert_eq!(transition(ReactivatingCe, CeTimeout, has_host), DropInitiatorToIdle);
            assert_eq!(transition(ReactivatedCe, MatchingActivation, has_host), CeReactivated);
            assert_eq!(
                transition(ReactivatedCe, Deactivation, has_host),
                ReenterCeReactivation
            );
        }
        assert_eq!(transition(HaveInitiator, MatchingActivation, true), CeReactivated);
        assert_eq!(transition(HaveInitiator, MatchingActivation, false), InitiatorKeptAlive);
        assert_eq!(transition(HaveInitiator, Deactivation, true), EnterCeReactivation);
        assert_eq!(transition(HaveInitiator, Deactivation, false), DropInitiatorToIdle);
    }

    #[test]
    fn op_mask_translation() {
        assert_eq!(
            nci_op_mask(OpModes::READER_WRITER),
            NciOpMask::RW | NciOpMask::POLL
        );
        assert_eq!(
            nci_op_mask(OpModes::P2P_INITIATOR | OpModes::P2P_TARGET),
            NciOpMask::PEER | NciOpMask::POLL | NciOpMask::LISTEN
        );
        assert_eq!(
            nci_op_mask(OpModes::CARD_EMULATION),
            NciOpMask::CE | NciOpMask::LISTEN
        );
        assert_eq!(nci_op_mask(OpModes::empty()), NciOpMask::empty());
    }

    #[test]
    fn t2_tag_arrival_and_presence_failure() {
        let (mut adapter, mut rx) = adapter();
        adapter.submit_mode_request(OpModes::READER_WRITER);
        rf_active(&mut adapter, NciState::PollActive);
        drain(&mut rx);

        adapter.intf_activated(t2_activation());
        assert_eq!(adapter.internal_state(), InternalState::HaveTarget);
        assert!(adapter.has_target());
        assert!(adapter.presence_check_armed());
        assert_eq!(
            adapter.framework.calls,
            vec!["tag_t2:[04, 11, 22, 33, 44, 55, 66]"]
        );
        assert_invariants(&adapter);

        // First probe goes out as a T2 READ of block 0.
        adapter.presence_tick();
        let cmds = drain(&mut rx);
        let handle = match &cmds[..] {
            [NciCommand::SendData { handle, conn_id: 0, data }] => {
                assert_eq!(data.as_ref(), &[0x30, 0x00]);
                *handle
            }
            other => panic!("unexpected commands {:?}", other),
        };

        // The probe fails: the tag is gone and discovery restarts.
        adapter.send_complete(handle, false);
        assert_eq!(adapter.internal_state(), InternalState::Idle);
        assert!(!adapter.has_target());
        assert!(!adapter.presence_check_armed());
        assert_eq!(adapter.framework.calls[1..], ["gone:1"]);
        assert_eq!(drain(&mut rx), vec![NciCommand::SetState(NciState::Discovery)]);
        assert_invariants(&adapter);
    }

    #[test]
    fn presence_probe_skipped_while_busy_or_sequenced() {
        let (mut adapter, mut rx) = adapter();
        adapter.intf_activated(t2_activation());
        drain(&mut rx);

        adapter.framework.seq_flags = SequenceFlags::NO_PRESENCE_CHECKS;
        adapter.presence_tick();
        assert!(drain(&mut rx).is_empty());
        assert!(adapter.presence_check_id.is_none());
        assert!(adapter.presence_check_armed());

        adapter.framework.seq_flags = SequenceFlags::empty();
        let id = adapter.transmit(Bytes::from_static(&[0x30, 0x04])).unwrap();
        drain(&mut rx);
        adapter.presence_tick();
        assert!(drain(&mut rx).is_empty());
        assert!(adapter.presence_check_id.is_none());
        assert_eq!(adapter.target.as_ref().unwrap().current_user_transmit(), Some(id));
    }

    #[test]
    fn transmit_reply_race_resolves_on_send_complete() {
        let (mut adapter, mut rx) = adapter();
        adapter.intf_activated(t4a_activation());
        assert_eq!(adapter.framework.calls, vec!["tag_t4a"]);
        drain(&mut rx);

        adapter.transmit(Bytes::from_static(&[0x00, 0xa4, 0x04, 0x00])).unwrap();
        assert!(adapter.transmit_deadline.is_some());
        let handle = match &drain(&mut rx)[..] {
            [NciCommand::SendData { handle, .. }] => *handle,
            other => panic!("unexpected commands {:?}", other),
        };

        // Reply first, then the send completion.
        adapter.data_packet(0, Bytes::from_static(&[0x90, 0x00]));
        assert_eq!(adapter.framework.calls.len(), 1);
        adapter.send_complete(handle, true);
        assert_eq!(adapter.framework.calls[1], "transmit_done:1:Ok:[90, 00]");
        assert!(adapter.transmit_deadline.is_none());
        assert_invariants(&adapter);
    }

    #[test]
    fn transmit_timeout_reports_an_error() {
        let (mut adapter, mut rx) = adapter();
        adapter.intf_activated(t4a_activation());
        drain(&mut rx);

        adapter.transmit(Bytes::from_static(&[0x00])).unwrap();
        drain(&mut rx);
        adapter.transmit_timeout();
        assert_eq!(adapter.framework.calls[1], "transmit_done:1:Error:[]");
        assert!(matches!(&drain(&mut rx)[..], [NciCommand::CancelSend(_)]));
        // The target itself stays, only the transmission failed.
        assert!(adapter.has_target());
        assert_invariants(&adapter);
    }

    #[test]
    fn ce_reactivation_success() {
        let (mut adapter, mut rx) = adapter();
        adapter.submit_mode_request(OpModes::CARD_EMULATION);
        adapter.intf_activated(ce_activation());
        assert_eq!(adapter.internal_state(), InternalState::HaveInitiator);
        assert_eq!(adapter.framework.calls, vec!["initiator:A", "host"]);
        rf_active(&mut adapter, NciState::ListenActive);
        drain(&mut rx);

        // RF loss: the listen technology locks and the timer arms.
        adapter.nci_next_state(NciState::Discovery);
        assert_eq!(adapter.internal_state(), InternalState::ReactivatingCe);
        assert!(adapter.ce_timer_armed());
        assert_eq!(adapter.active_tech_mask(), TechMask::A_LISTEN);
        assert!(drain(&mut rx).contains(&NciCommand::SetTechs(TechMask::A_LISTEN)));
        assert_invariants(&adapter);

        // The reader selects us again with the same interface.
        adapter.intf_activated(ce_activation());
        assert_eq!(adapter.internal_state(), InternalState::ReactivatedCe);
        assert!(!adapter.ce_timer_armed());
        assert_eq!(adapter.framework.calls[2..], ["reactivated:1"]);
        // The technology stays locked until the initiator goes away.
        assert_eq!(adapter.active_tech_mask(), TechMask::A_LISTEN);
        assert_invariants(&adapter);
    }

    #[test]
    fn ce_reactivation_timeout_restores_technologies() {
        let (mut adapter, mut rx) = adapter();
        adapter.intf_activated(ce_activation());
        rf_active(&mut adapter, NciState::ListenActive);
        adapter.nci_next_state(NciState::Discovery);
        assert_eq!(adapter.internal_state(), InternalState::ReactivatingCe);
        drain(&mut rx);

        adapter.ce_timeout();
        assert_eq!(adapter.internal_state(), InternalState::Idle);
        assert!(!adapter.has_initiator());
        assert_eq!(adapter.active_tech_mask(), TechMask::ALL);
        assert_eq!(adapter.framework.calls[2..], ["gone:2", "gone:1"]);
        assert!(drain(&mut rx).contains(&NciCommand::SetTechs(TechMask::ALL)));
        assert_invariants(&adapter);
    }

    #[test]
    fn repeated_matching_activations_renotify_reactivation() {
        let (mut adapter, _rx) = adapter();
        adapter.intf_activated(ce_activation());
        rf_active(&mut adapter, NciState::ListenActive);

        adapter.intf_activated(ce_activation());
        assert_eq!(adapter.internal_state(), InternalState::ReactivatedCe);
        adapter.intf_activated(ce_activation());
        assert_eq!(adapter.internal_state(), InternalState::ReactivatedCe);
        let notifications: Vec<_> = adapter
            .framework
            .calls
            .iter()
            .filter(|c| c.starts_with("reactivated"))
            .collect();
        assert_eq!(notifications, vec!["reactivated:1", "reactivated:1"]);
        assert_invariants(&adapter);
    }

    #[test]
    fn initiator_without_host_is_kept_alive_silently() {
        let (mut adapter, _rx) = adapter();
        adapter.intf_activated(ce_activation());
        // The framework dropped the host object.
        adapter.object_destroyed(ObjectId(2));

        adapter.intf_activated(ce_activation());
        assert_eq!(adapter.internal_state(), InternalState::HaveInitiator);
        assert!(adapter.framework.calls.iter().all(|c| !c.starts_with("reactivated")));

        // Without a host, a deactivation drops the initiator outright.
        rf_active(&mut adapter, NciState::ListenActive);
        adapter.nci_next_state(NciState::Discovery);
        assert_eq!(adapter.internal_state(), InternalState::Idle);
        assert!(!adapter.ce_timer_armed());
        assert_eq!(adapter.active_tech_mask(), TechMask::ALL);
        assert_invariants(&adapter);
    }

    #[test]
    fn reactivate_request_denied_in_unstable_rf_state() {
        let (mut adapter, mut rx) = adapter();
        adapter.intf_activated(t2_activation());
        rf_active(&mut adapter, NciState::PollActive);
        adapter.nci_next = NciState::Discovery;
        drain(&mut rx);

        assert!(!adapter.reactivate());
        assert_eq!(adapter.internal_state(), InternalState::HaveTarget);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn reactivate_request_roundtrip() {
        let (mut adapter, mut rx) = adapter();
        adapter.intf_activated(t2_activation());
        rf_active(&mut adapter, NciState::PollActive);
        drain(&mut rx);

        assert!(adapter.reactivate());
        assert_eq!(adapter.internal_state(), InternalState::ReactivatingTarget);
        assert!(!adapter.presence_check_armed());
        assert!(drain(&mut rx).contains(&NciCommand::SetState(NciState::Discovery)));

        // NCI cycles through discovery without dropping the endpoint.
        adapter.nci_next_state(NciState::Discovery);
        assert_eq!(adapter.internal_state(), InternalState::ReactivatingTarget);

        adapter.intf_activated(t2_activation());
        assert_eq!(adapter.internal_state(), InternalState::HaveTarget);
        assert!(adapter.presence_check_armed());
        assert_eq!(adapter.framework.calls[1..], ["reactivated:1"]);
        assert_invariants(&adapter);
    }

    #[test]
    fn random_nfcid1_survives_reactivation() {
        let poll_a = |uid: &[u8]| {
            let mut mp = vec![0x04, 0x00, 0x04];
            mp.extend_from_slice(uid);
            mp.extend_from_slice(&[0x01, 0x20]);
            IntfActivated::new(
                1,
                RfInterface::Frame,
                RfProtocol::T2t,
                RfMode::PassivePollA,
                Bytes::from(mp),
                Bytes::new(),
            )
        };
        let (mut adapter, _rx) = adapter();
        adapter.intf_activated(poll_a(&[0x08, 0x01, 0x02, 0x03]));
        rf_active(&mut adapter, NciState::PollActive);
        assert!(adapter.reactivate());

        adapter.intf_activated(poll_a(&[0x08, 0xaa, 0xbb, 0xcc]));
        assert_eq!(adapter.internal_state(), InternalState::HaveTarget);
        assert_eq!(adapter.framework.calls[1..], ["reactivated:1"]);
    }

    #[test]
    fn mismatched_reactivation_detects_a_new_endpoint() {
        let (mut adapter, _rx) = adapter();
        adapter.intf_activated(t2_activation());
        rf_active(&mut adapter, NciState::PollActive);
        assert!(adapter.reactivate());

        adapter.intf_activated(t4a_activation());
        assert_eq!(adapter.internal_state(), InternalState::HaveTarget);
        // Old tag gone, a fresh detection pass ran.
        assert_eq!(adapter.framework.calls[1..], ["gone:1", "tag_t4a"]);
        assert_invariants(&adapter);
    }

    #[test]
    fn deactivated_target_is_never_reused() {
        let (mut adapter, mut rx) = adapter();
        adapter.intf_activated(t2_activation());
        adapter.deactivate_target();
        assert_eq!(adapter.internal_state(), InternalState::Idle);
        assert!(drain(&mut rx).contains(&NciCommand::SetState(NciState::Discovery)));

        adapter.intf_activated(t2_activation());
        assert_eq!(adapter.internal_state(), InternalState::HaveTarget);
        // Second detection pass created a second framework object.
        assert_eq!(
            adapter.framework.calls,
            vec![
                "tag_t2:[04, 11, 22, 33, 44, 55, 66]",
                "gone:1",
                "tag_t2:[04, 11, 22, 33, 44, 55, 66]",
            ]
        );
        assert_eq!(adapter.tag, Some(ObjectId(2)));
        assert_invariants(&adapter);
    }

    #[test]
    fn no_factory_match_returns_nci_to_idle() {
        let (mut adapter, mut rx) = adapter();
        adapter.framework.refuse_factories = true;
        adapter.intf_activated(t2_activation());
        assert_eq!(adapter.internal_state(), InternalState::Idle);
        assert!(!adapter.has_target());
        assert!(drain(&mut rx).contains(&NciCommand::SetState(NciState::Idle)));
        assert_invariants(&adapter);
    }

    #[test]
    fn mode_check_confirms_and_tracks() {
        let (mut adapter, mut rx) = adapter();
        assert!(adapter.submit_mode_request(OpModes::READER_WRITER));
        let cmds = drain(&mut rx);
        assert!(cmds.contains(&NciCommand::SetOpMask(NciOpMask::RW | NciOpMask::POLL)));
        assert!(cmds.contains(&NciCommand::SetState(NciState::Discovery)));

        // NCI still idle: the request is not confirmed yet.
        adapter.run_mode_check();
        assert!(adapter.framework.calls.is_empty());

        adapter.nci_current_state(NciState::Discovery);
        adapter.run_mode_check();
        assert_eq!(adapter.framework.calls, vec!["mode:0x01:true"]);
        assert_eq!(adapter.current_mode(), OpModes::READER_WRITER);

        // NCI falls back to idle on its own: unconfirmed change, and the
        // state check kicks discovery again.
        adapter.nci_current_state(NciState::Idle);
        adapter.run_mode_check();
        assert_eq!(adapter.framework.calls[1..], ["mode:0x00:false"]);
        assert_eq!(adapter.current_mode(), OpModes::empty());
        assert!(drain(&mut rx).contains(&NciCommand::SetState(NciState::Discovery)));
    }

    #[test]
    fn cancel_mode_request_clears_the_mask() {
        let (mut adapter, mut rx) = adapter();
        adapter.submit_mode_request(OpModes::READER_WRITER);
        drain(&mut rx);
        adapter.cancel_mode_request();
        assert!(drain(&mut rx).contains(&NciCommand::SetOpMask(NciOpMask::empty())));
        adapter.run_mode_check();
        assert_eq!(adapter.framework.calls, vec!["mode:0x00:true"]);
    }

    #[test]
    fn allowed_techs_respect_support_and_lock() {
        let (mut adapter, mut rx) = adapter();
        adapter.set_allowed_techs(TechMask::A);
        assert_eq!(
            drain(&mut rx),
            vec![NciCommand::SetTechs(TechMask::A | TechMask::V)]
        );

        // While the CE technology is locked, the push is masked.
        adapter.intf_activated(ce_activation());
        rf_active(&mut adapter, NciState::ListenActive);
        adapter.nci_next_state(NciState::Discovery);
        drain(&mut rx);
        adapter.set_allowed_techs(TechMask::A | TechMask::B);
        assert_eq!(
            drain(&mut rx),
            vec![NciCommand::SetTechs(TechMask::A_LISTEN)]
        );
    }

    #[test]
    fn la_nfcid1_pass_through() {
        let params = crate::nci::ParamCache::default();
        params.lock().unwrap().insert(
            NciParam::LaNfcid1,
            Bytes::from_static(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa]),
        );
        let (nci, mut rx) = NciHandle::with_params(params);
        let mut adapter = Adapter::new(TestFw::default(), nci, TechMask::ALL);

        assert_eq!(adapter.list_params(), &[AdapterParam::LaNfcid1]);
        // Copies at most the framework's maximum NFCID1 length.
        let value = adapter.get_param(AdapterParam::LaNfcid1).unwrap();
        assert_eq!(value.len(), MAX_NFCID1_LEN);

        adapter.set_params(
            &[(AdapterParam::LaNfcid1, Bytes::from_static(&[0x08, 0x01, 0x02, 0x03]))],
            true,
        );
        match &drain(&mut rx)[..] {
            [NciCommand::SetParams { params, reset: true }] => {
                assert_eq!(params[0].0, NciParam::LaNfcid1);
            }
            other => panic!("unexpected commands {:?}", other),
        }

        adapter.nci_event(NciEvent::ParamChanged(NciParam::LaNfcid1));
        assert_eq!(adapter.framework.calls, vec!["param:LaNfcid1"]);
    }

    #[test]
    fn power_loss_severs_the_endpoint() {
        let (mut adapter, mut rx) = adapter();
        adapter.intf_activated(t4a_activation());
        adapter.transmit(Bytes::from_static(&[0x00])).unwrap();
        drain(&mut rx);

        adapter.set_powered(false);
        assert_eq!(adapter.internal_state(), InternalState::Idle);
        assert!(!adapter.has_target());
        // The outstanding transmission failed and NCI parked in idle.
        assert!(adapter
            .framework
            .calls
            .contains(&"transmit_done:1:Error:[]".to_string()));
        let cmds = drain(&mut rx);
        assert!(cmds.contains(&NciCommand::SetState(NciState::Idle)));
        assert!(matches!(cmds[0], NciCommand::CancelSend(_)));
        assert_invariants(&adapter);
    }
}
