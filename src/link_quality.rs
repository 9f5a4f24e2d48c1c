//! # Link Quality Tracking
//!
//! A [`LinkQualitySample`] is the Primary's view of its GCS link: the last signal
//! levels plus heartbeat accounting. The jamming detector classifies samples with
//! [`LinkQualityThresholds`]; the Secondary reuses the same thresholds to decide
//! whether its own GCS link is good enough to offer relaying.

/// Counters are halved once this many heartbeats have been accounted, so the loss
/// figure follows recent conditions instead of the whole uptime.
const LOSS_WINDOW: u32 = 100;

/// Limits separating a usable link from a poor one
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct LinkQualityThresholds {
    /// Below this RSSI (dBm) a sample is poor
    pub min_rssi: f32,
    /// Below this SNR (dB) a sample is poor
    pub min_snr: f32,
    /// Above this loss (percent) a sample is poor, once `min_expected` is exceeded
    pub max_loss_percent: f32,
    pub min_expected: u32,
    /// More lost heartbeats in a row than this makes a sample poor
    pub max_consecutive_lost: u32,
}

impl Default for LinkQualityThresholds {
    fn default() -> Self {
        LinkQualityThresholds {
            min_rssi: -100.0,
            min_snr: 5.0,
            max_loss_percent: 30.0,
            min_expected: 10,
            max_consecutive_lost: 5,
        }
    }
}

impl LinkQualityThresholds {
    /// Whether a GCS link with these figures can carry relayed traffic
    pub fn gcs_usable(&self, rssi: f32, loss_percent: f32) -> bool {
        rssi >= self.min_rssi && loss_percent <= self.max_loss_percent
    }
}

/// Snapshot of the GCS link as seen by the Primary
#[derive(Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct LinkQualitySample {
    pub rssi: f32,
    pub snr: f32,
    pub packets_expected: u32,
    pub packets_received: u32,
    pub consecutive_lost: u32,
    /// False until a signal level has been measured; the RSSI and SNR criteria are
    /// skipped before that
    pub measured: bool,
}

impl LinkQualitySample {
    pub const fn new() -> Self {
        LinkQualitySample {
            rssi: 0.0,
            snr: 0.0,
            packets_expected: 0,
            packets_received: 0,
            consecutive_lost: 0,
            measured: false,
        }
    }

    /// Sample with fixed figures, as reported by an external link monitor
    pub fn with_figures(rssi: f32, snr: f32, packets_expected: u32, packets_received: u32, consecutive_lost: u32) -> Self {
        LinkQualitySample {
            rssi,
            snr,
            packets_expected,
            packets_received,
            consecutive_lost,
            measured: true,
        }
    }

    /// `(expected − received) / expected · 100`, or 0 before anything was expected
    pub fn loss_percent(&self) -> f32 {
        if self.packets_expected == 0 {
            return 0.0;
        }
        let lost = self.packets_expected.saturating_sub(self.packets_received);
        lost as f32 / self.packets_expected as f32 * 100.0
    }

    pub fn update_signal(&mut self, rssi: f32, snr: f32) {
        self.rssi = rssi;
        self.snr = snr;
        self.measured = true;
    }

    /// Accounts for one sent heartbeat
    ///
    /// # Arguments
    /// * `previous_answered` - Whether any response arrived since the last heartbeat
    pub fn heartbeat_sent(&mut self, previous_answered: bool) {
        if !previous_answered && self.packets_expected > 0 {
            self.consecutive_lost = self.consecutive_lost.saturating_add(1);
        }
        if self.packets_expected >= LOSS_WINDOW {
            self.packets_expected /= 2;
            self.packets_received /= 2;
        }
        self.packets_expected += 1;
    }

    /// Accounts for the first response to the most recent heartbeat
    pub fn response_received(&mut self) {
        self.packets_received = (self.packets_received + 1).min(self.packets_expected);
        self.consecutive_lost = 0;
    }

    /// A sample is poor if any single criterion fails
    pub fn is_poor(&self, thresholds: &LinkQualityThresholds) -> bool {
        let weak_signal = self.measured && (self.rssi < thresholds.min_rssi || self.snr < thresholds.min_snr);
        let lossy = self.packets_expected > thresholds.min_expected && self.loss_percent() > thresholds.max_loss_percent;
        weak_signal || lossy || self.consecutive_lost > thresholds.max_consecutive_lost
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn loss_is_zero_before_any_heartbeat() {
        assert_eq!(LinkQualitySample::new().loss_percent(), 0.0);
    }

    #[test]
    fn loss_percent_from_counters() {
        let sample = LinkQualitySample::with_figures(-70.0, 8.0, 20, 10, 0);
        assert_eq!(sample.loss_percent(), 50.0);
    }

    #[test]
    fn each_criterion_alone_makes_a_sample_poor() {
        let thresholds = LinkQualityThresholds::default();
        let good = LinkQualitySample::with_figures(-80.0, 8.0, 20, 19, 0);
        assert!(!good.is_poor(&thresholds));

        assert!(LinkQualitySample { rssi: -101.0, ..good }.is_poor(&thresholds));
        assert!(LinkQualitySample { snr: 4.5, ..good }.is_poor(&thresholds));
        assert!(LinkQualitySample { packets_received: 13, ..good }.is_poor(&thresholds));
        assert!(LinkQualitySample { consecutive_lost: 6, ..good }.is_poor(&thresholds));
    }

    #[test]
    fn loss_needs_enough_expected_packets() {
        let thresholds = LinkQualityThresholds::default();
        let sample = LinkQualitySample::with_figures(-80.0, 8.0, 10, 0, 0);
        assert!(!sample.is_poor(&thresholds));
    }

    #[test]
    fn unmeasured_signal_is_not_judged() {
        let thresholds = LinkQualityThresholds::default();
        assert!(!LinkQualitySample::new().is_poor(&thresholds));
    }

    #[test]
    fn unanswered_heartbeats_count_as_consecutive_losses() {
        let mut sample = LinkQualitySample::new();
        sample.heartbeat_sent(true);
        sample.heartbeat_sent(false);
        sample.heartbeat_sent(false);
        assert_eq!(sample.packets_expected, 3);
        assert_eq!(sample.consecutive_lost, 2);
        sample.response_received();
        assert_eq!(sample.consecutive_lost, 0);
        assert_eq!(sample.packets_received, 1);
    }

    #[test]
    fn window_halves_counters() {
        let mut sample = LinkQualitySample::with_figures(-80.0, 8.0, 100, 60, 0);
        sample.heartbeat_sent(true);
        assert_eq!(sample.packets_expected, 51);
        assert_eq!(sample.packets_received, 30);
    }

    #[test]
    fn gcs_usability() {
        let thresholds = LinkQualityThresholds::default();
        assert!(thresholds.gcs_usable(-100.0, 30.0));
        assert!(!thresholds.gcs_usable(-100.5, 0.0));
        assert!(!thresholds.gcs_usable(-60.0, 31.0));
    }
}
