//! Agreement state machine
//!
//! `Unregistered -> Registered -> (Permitted) -> PartiallySigned -> FullySigned -> Executed | Killed`
//!
//! The lifecycle only records transitions the chain has accepted; callers
//! check a transition first, submit it, and apply it once correlated.

use super::terms::RecordStatus;

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgreementState {
    Unregistered,
    Registered,
    /// Every referenced token authorises the engine for both parties
    Permitted,
    PartiallySigned,
    FullySigned,
    Executed,
    Killed,
}

impl AgreementState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgreementState::Executed | AgreementState::Killed)
    }
}

impl fmt::Display for AgreementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Party {
    A,
    B,
}

/// Result of checking a signature before submitting it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignCheck {
    Submit,
    /// The party's signature is already recorded
    AlreadySigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementLifecycle {
    state: AgreementState,
    signed_a: bool,
    signed_b: bool,
}

impl Default for AgreementLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl AgreementLifecycle {
    pub fn new() -> Self {
        Self {
            state: AgreementState::Unregistered,
            signed_a: false,
            signed_b: false,
        }
    }

    /// Rebuild the lifecycle of an agreement registered in an earlier run
    /// from what the engine stores for it
    pub fn restore(signed_a: bool, signed_b: bool, status: RecordStatus) -> Self {
        let state = match (status, signed_a, signed_b) {
            (RecordStatus::Executed, _, _) => AgreementState::Executed,
            (RecordStatus::Killed, _, _) => AgreementState::Killed,
            (RecordStatus::Open, true, true) => AgreementState::FullySigned,
            (RecordStatus::Open, false, false) => AgreementState::Registered,
            (RecordStatus::Open, _, _) => AgreementState::PartiallySigned,
        };
        Self {
            state,
            signed_a,
            signed_b,
        }
    }

    pub fn state(&self) -> AgreementState {
        self.state
    }

    pub fn has_signed(&self, party: Party) -> bool {
        match party {
            Party::A => self.signed_a,
            Party::B => self.signed_b,
        }
    }

    pub fn registered(&mut self) -> Result<(), String> {
        if self.state != AgreementState::Unregistered {
            return Err(format!("agreement is already {}", self.state));
        }
        self.state = AgreementState::Registered;
        Ok(())
    }

    /// Record full authorisation. Only moves a freshly registered agreement;
    /// later states already imply it or no longer need it.
    pub fn permitted(&mut self) -> bool {
        if self.state == AgreementState::Registered {
            self.state = AgreementState::Permitted;
            return true;
        }
        false
    }

    pub fn check_sign(&self, party: Party) -> Result<SignCheck, String> {
        match self.state {
            AgreementState::Unregistered => Err("agreement is not registered".to_string()),
            s if s.is_terminal() => Err(format!("agreement is {}", s)),
            _ if self.has_signed(party) => Ok(SignCheck::AlreadySigned),
            _ => Ok(SignCheck::Submit),
        }
    }

    /// Apply an accepted signature; a repeat signature changes nothing
    pub fn signed(&mut self, party: Party) -> AgreementState {
        match party {
            Party::A => self.signed_a = true,
            Party::B => self.signed_b = true,
        }
        self.state = if self.signed_a && self.signed_b {
            AgreementState::FullySigned
        } else {
            AgreementState::PartiallySigned
        };
        self.state
    }

    pub fn check_execute(&self) -> Result<(), String> {
        if self.state != AgreementState::FullySigned {
            return Err(format!(
                "agreement is {}, execution requires FullySigned",
                self.state
            ));
        }
        Ok(())
    }

    pub fn executed(&mut self) {
        self.state = AgreementState::Executed;
    }

    pub fn check_kill(&self) -> Result<(), String> {
        match self.state {
            AgreementState::Unregistered => Err("agreement is not registered".to_string()),
            s if s.is_terminal() => Err(format!("agreement is already {}", s)),
            _ => Ok(()),
        }
    }

    pub fn killed(&mut self) {
        self.state = AgreementState::Killed;
    }
}
