//! # Primary Mode Machine
//!
//! The Primary is always in exactly one of two shapes:
//!
//! - `Stable(mode)`: one of `Direct`, `Bridge`, `Relay`
//! - `Switching { previous, target, started_at }`: a transition waiting for the
//!   Secondary's ACK, carrying the mode to fall back to
//!
//! `Switching` without a previous mode cannot be expressed. A transition resolves in
//! one of three ways:
//!
//! | Event | Result |
//! |---|---|
//! | ACK received | commit `target` |
//! | `transition_timeout` elapsed | revert to `previous`, count a transition failure |
//! | `watchdog_timeout` elapsed | forced revert to `previous`, counted separately |
//!
//! The watchdog only matters if polling stalled past both deadlines; it guarantees
//! the node never stays in `Switching`.

use embassy_time::{Duration, Instant};

/// Committed operating modes
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    /// GCS traffic handled on F1 only
    Direct,
    /// GCS traffic forwarded to and from the mesh through the Secondary
    Bridge,
    /// This vehicle's traffic travels through a peer relay
    Relay,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Direct => "DIRECT",
            Mode::Bridge => "BRIDGE",
            Mode::Relay => "RELAY",
        }
    }

    /// `RELAY_ACTIVATE` argument that announces this mode to the Secondary
    pub fn relay_active(self) -> bool {
        self == Mode::Relay
    }
}

/// Externally reported mode, including the transient `Switching`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperatingMode {
    Direct,
    Bridge,
    Relay,
    Switching,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Direct => "DIRECT",
            OperatingMode::Bridge => "BRIDGE",
            OperatingMode::Relay => "RELAY",
            OperatingMode::Switching => "SWITCHING",
        }
    }

    /// Byte carried in the F1 heartbeat
    pub fn wire_code(self) -> u8 {
        match self {
            OperatingMode::Direct => 0,
            OperatingMode::Bridge => 1,
            OperatingMode::Relay => 2,
            OperatingMode::Switching => 3,
        }
    }
}

impl From<Mode> for OperatingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Direct => OperatingMode::Direct,
            Mode::Bridge => OperatingMode::Bridge,
            Mode::Relay => OperatingMode::Relay,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModeState {
    Stable(Mode),
    Switching { previous: Mode, target: Mode, started_at: Instant },
}

/// Why a transition request was refused
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransitionError {
    /// Another transition is still waiting for its ACK
    AlreadySwitching,
    /// The node is already in the requested mode
    AlreadyInMode(Mode),
}

#[cfg(feature = "std")]
impl core::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransitionError::AlreadySwitching => write!(f, "a mode transition is already in progress"),
            TransitionError::AlreadyInMode(mode) => write!(f, "already in {} mode", mode.as_str()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransitionError {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RevertReason {
    AckTimeout,
    Watchdog,
    /// The `RELAY_ACTIVATE` command itself was abandoned by the pending tracker
    RetriesExhausted,
}

impl RevertReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RevertReason::AckTimeout => "ack timeout",
            RevertReason::Watchdog => "watchdog",
            RevertReason::RetriesExhausted => "retries exhausted",
        }
    }
}

/// Outcome of a resolved transition
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModeEvent {
    Committed { from: Mode, to: Mode },
    Reverted { abandoned: Mode, restored: Mode, reason: RevertReason },
}

pub struct ModeMachine {
    state: ModeState,
    transition_timeout: Duration,
    watchdog_timeout: Duration,
    transition_failures: u32,
    watchdog_reverts: u32,
}

impl ModeMachine {
    pub fn new(initial: Mode, transition_timeout: Duration, watchdog_timeout: Duration) -> Self {
        ModeMachine {
            state: ModeState::Stable(initial),
            transition_timeout,
            watchdog_timeout,
            transition_failures: 0,
            watchdog_reverts: 0,
        }
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn operating_mode(&self) -> OperatingMode {
        match self.state {
            ModeState::Stable(mode) => mode.into(),
            ModeState::Switching { .. } => OperatingMode::Switching,
        }
    }

    /// The mode whose forwarding rules apply: the committed mode, or the one being left
    pub fn effective(&self) -> Mode {
        match self.state {
            ModeState::Stable(mode) => mode,
            ModeState::Switching { previous, .. } => previous,
        }
    }

    pub fn is_switching(&self) -> bool {
        matches!(self.state, ModeState::Switching { .. })
    }

    pub fn transition_failures(&self) -> u32 {
        self.transition_failures
    }

    pub fn watchdog_reverts(&self) -> u32 {
        self.watchdog_reverts
    }

    /// Starts a transition towards `target`
    ///
    /// # Returns
    /// * `Ok(previous)` - The mode being left; the caller sends `RELAY_ACTIVATE`
    /// * `Err(TransitionError)` - Nothing changed
    pub fn begin(&mut self, target: Mode, now: Instant) -> Result<Mode, TransitionError> {
        match self.state {
            ModeState::Switching { .. } => Err(TransitionError::AlreadySwitching),
            ModeState::Stable(current) if current == target => Err(TransitionError::AlreadyInMode(current)),
            ModeState::Stable(previous) => {
                self.state = ModeState::Switching {
                    previous,
                    target,
                    started_at: now,
                };
                Ok(previous)
            }
        }
    }

    /// Commits the pending transition, if any
    pub fn on_ack(&mut self) -> Option<ModeEvent> {
        match self.state {
            ModeState::Switching { previous, target, .. } => {
                self.state = ModeState::Stable(target);
                Some(ModeEvent::Committed { from: previous, to: target })
            }
            ModeState::Stable(_) => None,
        }
    }

    /// Abandons the pending transition, if any
    pub fn abort(&mut self, reason: RevertReason) -> Option<ModeEvent> {
        match self.state {
            ModeState::Switching { previous, target, .. } => {
                self.state = ModeState::Stable(previous);
                self.transition_failures = self.transition_failures.wrapping_add(1);
                if reason == RevertReason::Watchdog {
                    self.watchdog_reverts = self.watchdog_reverts.wrapping_add(1);
                }
                Some(ModeEvent::Reverted {
                    abandoned: target,
                    restored: previous,
                    reason,
                })
            }
            ModeState::Stable(_) => None,
        }
    }

    /// Applies the transition and watchdog deadlines
    pub fn poll(&mut self, now: Instant) -> Option<ModeEvent> {
        let started_at = match self.state {
            ModeState::Switching { started_at, .. } => started_at,
            ModeState::Stable(_) => return None,
        };
        let elapsed = now.saturating_duration_since(started_at);
        if elapsed >= self.watchdog_timeout {
            self.abort(RevertReason::Watchdog)
        } else if elapsed >= self.transition_timeout {
            self.abort(RevertReason::AckTimeout)
        } else {
            None
        }
    }
}
