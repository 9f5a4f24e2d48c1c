//! Pending-command tracker
//!
//! Commands that need an ACK stay here until the Secondary acknowledges them. ACKs
//! carry no sequence number, so they always retire the oldest entry. An entry that
//! stays unacknowledged is resent with an exponential backoff
//! (`ack_timeout · 2^retries`) and abandoned after `max_retries` resends.

use embassy_time::{Duration, Instant};
use heapless::{Deque, Vec};

use crate::link::{CommandCode, LinkMessage};
use crate::PENDING_COMMANDS;

#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct PendingCommand {
    pub message: LinkMessage,
    pub sent_at: Instant,
    pub retries: u8,
}

/// What the tracker wants done after a poll
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum PendingEvent {
    Resend(LinkMessage),
    GaveUp(CommandCode),
}

pub struct PendingTracker {
    entries: Deque<PendingCommand, PENDING_COMMANDS>,
    ack_timeout: Duration,
    max_retries: u8,
    uart_timeouts: u32,
}

impl PendingTracker {
    pub fn new(ack_timeout: Duration, max_retries: u8) -> Self {
        PendingTracker {
            entries: Deque::new(),
            ack_timeout,
            max_retries,
            uart_timeouts: 0,
        }
    }

    /// Starts tracking a command that was just sent
    ///
    /// # Returns
    /// * `true` - The command is tracked
    /// * `false` - The tracker is full; the command will not be retried
    pub fn track(&mut self, message: LinkMessage, now: Instant) -> bool {
        let code = message.code();
        let entry = PendingCommand {
            message,
            sent_at: now,
            retries: 0,
        };
        if self.entries.push_back(entry).is_err() {
            log::warn!("[P] Pending command list full, {} will not be retried", code.name());
            return false;
        }
        true
    }

    /// Retires the oldest pending command
    pub fn on_ack(&mut self) -> Option<PendingCommand> {
        self.entries.pop_front()
    }

    /// Stops tracking every pending command with `code`
    pub fn cancel(&mut self, code: CommandCode) {
        let len = self.entries.len();
        for _ in 0..len {
            if let Some(entry) = self.entries.pop_front() {
                if entry.message.code() != code {
                    let _ = self.entries.push_back(entry);
                }
            }
        }
    }

    /// Resends overdue commands and abandons the ones out of retries
    pub fn poll(&mut self, now: Instant) -> Vec<PendingEvent, PENDING_COMMANDS> {
        let mut events = Vec::new();
        let len = self.entries.len();
        for _ in 0..len {
            let Some(mut entry) = self.entries.pop_front() else {
                break;
            };
            let backoff = self.ack_timeout * (1u32 << entry.retries.min(16));
            if now.saturating_duration_since(entry.sent_at) < backoff {
                let _ = self.entries.push_back(entry);
                continue;
            }

            if entry.retries < self.max_retries {
                entry.retries += 1;
                entry.sent_at = now;
                log::debug!(
                    "[P] Resending {} (retry {}/{})",
                    entry.message.code().name(),
                    entry.retries,
                    self.max_retries
                );
                let _ = events.push(PendingEvent::Resend(entry.message.clone()));
                let _ = self.entries.push_back(entry);
            } else {
                self.uart_timeouts = self.uart_timeouts.wrapping_add(1);
                let code = entry.message.code();
                log::error!("[P] {} not acknowledged after {} retries, giving up", code.name(), self.max_retries);
                let _ = events.push(PendingEvent::GaveUp(code));
            }
        }
        events
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Commands abandoned without an ACK
    pub fn uart_timeouts(&self) -> u32 {
        self.uart_timeouts
    }
}
