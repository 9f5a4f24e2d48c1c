//! # Relay Discovery State Machine
//!
//! Runs on a Secondary whose Primary has lost its GCS link and needs a peer relay.
//!
//! | State | Event | Next |
//! |---|---|---|
//! | `Idle` | start | `Requesting` (candidate found) or `Discovering` |
//! | `Discovering` | start | unchanged, exclusions kept |
//! | `Discovering` | retry timer | `Requesting`, `Discovering`, or `Idle` after the last attempt |
//! | `Requesting` | matching Acceptance | `Connected` |
//! | `Requesting` | matching Rejection | rejecter excluded, reselect |
//! | `Requesting` | no reply | resend, then exclude the target and reselect |
//! | `Connected` | relay heartbeat timeout | `Idle` |
//! | any | teardown | `Idle` |
//!
//! The machine never touches the radio. Each call returns the [`DiscoveryAction`]s
//! the node must carry out, in order.

use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::log;

use crate::link::RelayLostReason;
use crate::{RelayConfiguration, RELAY_TABLE_SIZE};

use super::selector::{select_best, Selection, SelectionContext};

/// Actions produced by one discovery event
pub type DiscoveryActions = Vec<DiscoveryAction, 4>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiscoveryState {
    Idle,
    Discovering {
        attempt: u8,
        retry_at: Instant,
    },
    Requesting {
        target: u8,
        sequence: u16,
        retries: u8,
        sent_at: Instant,
        attempt: u8,
    },
    Connected {
        relay_id: u8,
        since: Instant,
        last_heartbeat: Instant,
    },
}

impl DiscoveryState {
    /// Numeric state reported in `STATUS_REPORT`
    pub fn code(&self) -> u8 {
        match self {
            DiscoveryState::Idle => 0,
            DiscoveryState::Discovering { .. } => 1,
            DiscoveryState::Requesting { .. } => 2,
            DiscoveryState::Connected { .. } => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryState::Idle => "IDLE",
            DiscoveryState::Discovering { .. } => "DISCOVERING",
            DiscoveryState::Requesting { .. } => "REQUESTING",
            DiscoveryState::Connected { .. } => "CONNECTED",
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum DiscoveryAction {
    /// A relay was chosen; tell the Primary
    Selected(Selection),
    /// Send (or resend) a Request on the mesh
    SendRequest { target: u8, sequence: u16 },
    Established { relay_id: u8 },
    Lost { relay_id: u8, reason: RelayLostReason },
    /// Every selection round came up empty
    GaveUp,
}

pub struct RelayDiscovery {
    state: DiscoveryState,
    excluded: Vec<u8, RELAY_TABLE_SIZE>,
    next_sequence: u16,
    retry_interval: Duration,
    max_attempts: u8,
    request_timeout: Duration,
    max_request_retries: u8,
    relay_timeout: Duration,
}

impl RelayDiscovery {
    pub fn new(config: &RelayConfiguration) -> Self {
        let RelayConfiguration {
            discovery_retry_ms,
            max_discovery_attempts,
            request_timeout_ms,
            max_request_retries,
            client_timeout_ms,
            ..
        } = *config;
        RelayDiscovery {
            state: DiscoveryState::Idle,
            excluded: Vec::new(),
            next_sequence: 0,
            retry_interval: Duration::from_millis(discovery_retry_ms),
            max_attempts: max_discovery_attempts.max(1),
            request_timeout: Duration::from_millis(request_timeout_ms),
            max_request_retries,
            relay_timeout: Duration::from_millis(client_timeout_ms),
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// The relay this node is a client of
    pub fn connected_relay(&self) -> Option<u8> {
        match self.state {
            DiscoveryState::Connected { relay_id, .. } => Some(relay_id),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != DiscoveryState::Idle
    }

    pub fn excluded(&self) -> &[u8] {
        &self.excluded
    }

    /// Starts a discovery session
    ///
    /// Only an idle session starts over. A session already searching keeps its
    /// exclusions and attempt count; a connected node reports its relay again.
    pub fn start(&mut self, context: &SelectionContext<'_>, now: Instant) -> DiscoveryActions {
        let mut actions = DiscoveryActions::new();
        match self.state {
            DiscoveryState::Connected { relay_id, .. } => {
                log::debug!("[S] Discovery requested while connected to relay {}", relay_id);
                let _ = actions.push(DiscoveryAction::Established { relay_id });
            }
            DiscoveryState::Requesting { target, .. } => {
                log::debug!("[S] Discovery requested while waiting for relay {}", target);
            }
            DiscoveryState::Discovering { attempt, .. } => {
                log::debug!("[S] Discovery requested while searching (attempt {})", attempt);
            }
            DiscoveryState::Idle => {
                log!(log::Level::Info, "[S] Relay discovery started");
                self.excluded.clear();
                self.select(context, 1, now, &mut actions);
            }
        }
        actions
    }

    /// Handles an Acceptance addressed to this node
    pub fn on_acceptance(&mut self, relay_id: u8, sequence: u16, now: Instant) -> DiscoveryActions {
        let mut actions = DiscoveryActions::new();
        match self.state {
            DiscoveryState::Requesting {
                target, sequence: expected, ..
            } if target == relay_id && expected == sequence => {
                log!(log::Level::Info, "[S] Relay {} accepted us", relay_id);
                self.state = DiscoveryState::Connected {
                    relay_id,
                    since: now,
                    last_heartbeat: now,
                };
                self.excluded.clear();
                let _ = actions.push(DiscoveryAction::Established { relay_id });
            }
            _ => log::debug!("[S] Ignoring acceptance from {} (seq {})", relay_id, sequence),
        }
        actions
    }

    /// Handles a Rejection addressed to this node
    pub fn on_rejection(&mut self, relay_id: u8, sequence: u16, context: &SelectionContext<'_>, now: Instant) -> DiscoveryActions {
        let mut actions = DiscoveryActions::new();
        match self.state {
            DiscoveryState::Requesting {
                target,
                sequence: expected,
                attempt,
                ..
            } if target == relay_id && expected == sequence => {
                log!(log::Level::Info, "[S] Relay {} rejected us", relay_id);
                self.exclude(relay_id);
                let _ = actions.push(DiscoveryAction::Lost {
                    relay_id,
                    reason: RelayLostReason::Rejection,
                });
                self.select(context, attempt, now, &mut actions);
            }
            _ => log::debug!("[S] Ignoring rejection from {} (seq {})", relay_id, sequence),
        }
        actions
    }

    /// Any sign of life from the relay we are connected to
    pub fn on_relay_heartbeat(&mut self, relay_id: u8, now: Instant) {
        if let DiscoveryState::Connected {
            relay_id: connected,
            ref mut last_heartbeat,
            ..
        } = self.state
        {
            if connected == relay_id {
                *last_heartbeat = now;
            }
        }
    }

    /// Retry, retransmit and heartbeat deadlines
    pub fn poll(&mut self, context: &SelectionContext<'_>, now: Instant) -> DiscoveryActions {
        let mut actions = DiscoveryActions::new();
        match self.state {
            DiscoveryState::Idle => {}
            DiscoveryState::Discovering { attempt, retry_at } => {
                if now >= retry_at {
                    self.excluded.clear();
                    self.select(context, attempt.saturating_add(1), now, &mut actions);
                }
            }
            DiscoveryState::Requesting {
                target,
                sequence,
                retries,
                sent_at,
                attempt,
            } => {
                if now.saturating_duration_since(sent_at) < self.request_timeout {
                    return actions;
                }
                if retries < self.max_request_retries {
                    self.state = DiscoveryState::Requesting {
                        target,
                        sequence,
                        retries: retries + 1,
                        sent_at: now,
                        attempt,
                    };
                    log::debug!("[S] Resending request to relay {} ({})", target, retries + 1);
                    let _ = actions.push(DiscoveryAction::SendRequest { target, sequence });
                } else {
                    log!(log::Level::Warn, "[S] Relay {} never answered", target);
                    self.exclude(target);
                    let _ = actions.push(DiscoveryAction::Lost {
                        relay_id: target,
                        reason: RelayLostReason::HeartbeatTimeout,
                    });
                    self.select(context, attempt, now, &mut actions);
                }
            }
            DiscoveryState::Connected {
                relay_id, last_heartbeat, ..
            } => {
                if now.saturating_duration_since(last_heartbeat) >= self.relay_timeout {
                    log!(log::Level::Warn, "[S] Relay {} went silent", relay_id);
                    self.state = DiscoveryState::Idle;
                    let _ = actions.push(DiscoveryAction::Lost {
                        relay_id,
                        reason: RelayLostReason::HeartbeatTimeout,
                    });
                }
            }
        }
        actions
    }

    /// Ends the session
    ///
    /// # Returns
    /// The `Lost` notification for a relay that was requested or connected
    pub fn teardown(&mut self, reason: RelayLostReason) -> Option<DiscoveryAction> {
        let previous = self.state;
        self.state = DiscoveryState::Idle;
        self.excluded.clear();
        match previous {
            DiscoveryState::Connected { relay_id, .. }
            | DiscoveryState::Requesting { target: relay_id, .. } => {
                log!(log::Level::Info, "[S] Leaving relay {} ({:?})", relay_id, reason);
                Some(DiscoveryAction::Lost { relay_id, reason })
            }
            _ => None,
        }
    }

    fn select(&mut self, context: &SelectionContext<'_>, attempt: u8, now: Instant, actions: &mut DiscoveryActions) {
        match select_best(context, &self.excluded) {
            Some(selection) => {
                let sequence = self.next_sequence;
                self.next_sequence = self.next_sequence.wrapping_add(1);
                log!(
                    log::Level::Info,
                    "[S] Selected relay {} (score {}), requesting",
                    selection.relay_id,
                    selection.score
                );
                self.state = DiscoveryState::Requesting {
                    target: selection.relay_id,
                    sequence,
                    retries: 0,
                    sent_at: now,
                    attempt,
                };
                let _ = actions.push(DiscoveryAction::Selected(selection));
                let _ = actions.push(DiscoveryAction::SendRequest {
                    target: selection.relay_id,
                    sequence,
                });
            }
            None if attempt >= self.max_attempts => {
                log!(log::Level::Warn, "[S] No relay found after {} attempts", attempt);
                self.state = DiscoveryState::Idle;
                self.excluded.clear();
                let _ = actions.push(DiscoveryAction::GaveUp);
            }
            None => {
                log::debug!("[S] No relay available (attempt {}), retrying later", attempt);
                self.state = DiscoveryState::Discovering {
                    attempt,
                    retry_at: now + self.retry_interval,
                };
            }
        }
    }

    fn exclude(&mut self, relay_id: u8) {
        if !self.excluded.contains(&relay_id) && self.excluded.push(relay_id).is_err() {
            log::debug!("[S] Exclusion list full");
        }
    }
}
