//! # Radio Transmitter - CAD-Gated Transmission
//!
//! Every transmission on a shared channel goes through [`RadioTransmitter::transmit`]:
//!
//! 1. Run clear-channel assessment, bounded by `cad_timeout_ms` (some modems never
//!    report CAD done). A busy channel, a CAD error and a CAD timeout all count as one
//!    attempt; attempts are spaced by `cad_backoff_min_ms` plus a random jitter.
//! 2. After `cad_backoffs` unsuccessful attempts the frame is dropped and counted as
//!    a deferral. Frames are never queued for a later retry.
//! 3. Transmit, bounded by `tx_timeout_ms`.
//! 4. Return the modem to continuous receive. If that fails, run the driver's
//!    recovery routine.
//!
//! Data frames are best-effort: a failed transmission is counted, never retried.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Timer};
use log::log;
use rand_core::{RngCore, SeedableRng};
use rand_wyrand::WyRand;

use super::{CadResult, RadioDevice};
use crate::RelayConfiguration;

/// Transmit-side counters of one radio
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TransmitStats {
    pub frames_sent: u32,
    pub bytes_sent: u32,
    /// Frames dropped because the channel stayed busy
    pub cad_deferrals: u32,
    /// CAD operations that errored or timed out
    pub cad_failures: u32,
    pub tx_failures: u32,
    pub tx_timeouts: u32,
    /// Times the modem refused to go back to receive
    pub rx_restart_failures: u32,
    /// Frames lost on a path that needed a modem restart
    pub restart_drops: u32,
}

/// How a single transmit request ended
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransmitOutcome {
    Sent,
    ChannelBusy,
    Failed,
}

pub struct RadioTransmitter {
    label: &'static str,
    cad_attempts: u8,
    backoff_min_ms: u64,
    backoff_jitter_ms: u64,
    cad_timeout: Duration,
    tx_timeout: Duration,
    rng: WyRand,
    stats: TransmitStats,
}

impl RadioTransmitter {
    /// Creates a transmitter for one radio
    ///
    /// # Arguments
    /// * `label` - Radio name used in log lines (e.g. "F1", "F2")
    /// * `config` - CAD and timeout settings; `cad_backoffs == 0` disables the CAD gate
    /// * `rng_seed` - Seed for the backoff jitter
    pub fn new(label: &'static str, config: &RelayConfiguration, rng_seed: u64) -> Self {
        RadioTransmitter {
            label,
            cad_attempts: config.cad_backoffs,
            backoff_min_ms: config.cad_backoff_min_ms,
            backoff_jitter_ms: config.cad_backoff_jitter_ms,
            cad_timeout: Duration::from_millis(config.cad_timeout_ms),
            tx_timeout: Duration::from_millis(config.tx_timeout_ms),
            rng: WyRand::seed_from_u64(rng_seed),
            stats: TransmitStats::default(),
        }
    }

    pub fn stats(&self) -> TransmitStats {
        self.stats
    }

    /// Transmits one frame under the CAD discipline
    pub async fn transmit<R: RadioDevice>(&mut self, radio: &mut R, data: &[u8]) -> TransmitOutcome {
        if !self.wait_for_clear_channel(radio).await {
            self.stats.cad_deferrals = self.stats.cad_deferrals.wrapping_add(1);
            log::warn!("[{}] Channel busy after {} CAD attempts, dropping {} byte frame", self.label, self.cad_attempts, data.len());
            self.return_to_rx(radio).await;
            return TransmitOutcome::ChannelBusy;
        }

        let failed = match select(radio.send(data), Timer::after(self.tx_timeout)).await {
            Either::First(Ok(())) => {
                self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
                self.stats.bytes_sent = self.stats.bytes_sent.wrapping_add(data.len() as u32);
                log::trace!("[{}] Transmitted {} bytes", self.label, data.len());
                false
            }
            Either::First(Err(error)) => {
                self.stats.tx_failures = self.stats.tx_failures.wrapping_add(1);
                log!(log::Level::Error, "[{}] Transmission failed: {:?}", self.label, error);
                true
            }
            Either::Second(_) => {
                self.stats.tx_timeouts = self.stats.tx_timeouts.wrapping_add(1);
                log!(
                    log::Level::Error,
                    "[{}] Transmission timed out after {} ms",
                    self.label,
                    self.tx_timeout.as_millis()
                );
                true
            }
        };

        let restarted = self.return_to_rx(radio).await;
        if failed {
            if restarted {
                self.stats.restart_drops = self.stats.restart_drops.wrapping_add(1);
            }
            TransmitOutcome::Failed
        } else {
            TransmitOutcome::Sent
        }
    }

    async fn wait_for_clear_channel<R: RadioDevice>(&mut self, radio: &mut R) -> bool {
        if self.cad_attempts == 0 {
            return true;
        }
        for attempt in 0..self.cad_attempts {
            match select(radio.cad(), Timer::after(self.cad_timeout)).await {
                Either::First(Ok(CadResult::Free)) => return true,
                Either::First(Ok(CadResult::Busy)) => {
                    log::trace!("[{}] Channel busy (attempt {})", self.label, attempt + 1);
                }
                Either::First(Err(_)) => {
                    log::trace!("[{}] CAD error (attempt {})", self.label, attempt + 1);
                    self.stats.cad_failures = self.stats.cad_failures.wrapping_add(1);
                }
                Either::Second(_) => {
                    log::trace!("[{}] CAD timeout (attempt {})", self.label, attempt + 1);
                    self.stats.cad_failures = self.stats.cad_failures.wrapping_add(1);
                }
            }
            if attempt + 1 < self.cad_attempts {
                Timer::after(Duration::from_millis(self.backoff_ms())).await;
            }
        }
        false
    }

    fn backoff_ms(&mut self) -> u64 {
        if self.backoff_jitter_ms == 0 {
            self.backoff_min_ms
        } else {
            self.backoff_min_ms + self.rng.next_u64() % self.backoff_jitter_ms
        }
    }

    /// Puts the modem back into receive, recovering it if needed
    ///
    /// # Returns
    /// true if `set_rx` failed and the recovery routine had to run
    async fn return_to_rx<R: RadioDevice>(&mut self, radio: &mut R) -> bool {
        if radio.set_rx().is_ok() {
            return false;
        }
        self.stats.rx_restart_failures = self.stats.rx_restart_failures.wrapping_add(1);
        log!(log::Level::Error, "[{}] Failed to restart RX, recovering radio", self.label);
        if let Err(error) = radio.recover().await {
            log!(log::Level::Error, "[{}] Radio recovery failed: {:?}", self.label, error);
        }
        true
    }
}
