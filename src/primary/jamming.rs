//! Jamming detector and recovery hysteresis
//!
//! The detector counts consecutive poor link samples and fires once the streak
//! reaches `jamming_count`, then starts counting again. Leaving `Relay` needs the
//! opposite evidence: a streak of GCS packets above the recovery RSSI.

use crate::link_quality::{LinkQualitySample, LinkQualityThresholds};

pub struct JammingDetector {
    thresholds: LinkQualityThresholds,
    trigger_count: u8,
    bad_count: u8,
    recovery_rssi: f32,
    recovery_needed: u8,
    good_streak: u8,
}

impl JammingDetector {
    pub fn new(thresholds: LinkQualityThresholds, trigger_count: u8, recovery_rssi: f32, recovery_needed: u8) -> Self {
        JammingDetector {
            thresholds,
            trigger_count: trigger_count.max(1),
            bad_count: 0,
            recovery_rssi,
            recovery_needed: recovery_needed.max(1),
            good_streak: 0,
        }
    }

    /// Classifies one sample
    ///
    /// # Returns
    /// `true` when this sample completes a run of `trigger_count` poor samples
    pub fn evaluate(&mut self, sample: &LinkQualitySample) -> bool {
        if !sample.is_poor(&self.thresholds) {
            self.bad_count = 0;
            return false;
        }
        self.bad_count = self.bad_count.saturating_add(1);
        log::trace!("[P] Poor link sample ({}/{})", self.bad_count, self.trigger_count);
        if self.bad_count >= self.trigger_count {
            self.bad_count = 0;
            return true;
        }
        false
    }

    /// Feeds one GCS packet's RSSI into the recovery streak
    ///
    /// # Returns
    /// `true` once enough consecutive strong packets have arrived
    pub fn record_gcs_packet(&mut self, rssi: f32) -> bool {
        if rssi > self.recovery_rssi {
            self.good_streak = self.good_streak.saturating_add(1);
        } else {
            self.good_streak = 0;
        }
        self.good_streak >= self.recovery_needed
    }

    /// Clears both streaks, e.g. after a mode change
    pub fn reset(&mut self) {
        self.bad_count = 0;
        self.good_streak = 0;
    }

    pub fn bad_count(&self) -> u8 {
        self.bad_count
    }

    pub fn thresholds(&self) -> &LinkQualityThresholds {
        &self.thresholds
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn detector() -> JammingDetector {
        JammingDetector::new(LinkQualityThresholds::default(), 5, -90.0, 5)
    }

    fn jammed() -> LinkQualitySample {
        LinkQualitySample::with_figures(-110.0, 2.0, 20, 10, 0)
    }

    fn clean() -> LinkQualitySample {
        LinkQualitySample::with_figures(-70.0, 9.0, 20, 20, 0)
    }

    #[test]
    fn fires_on_fifth_poor_sample_only() {
        let mut d = detector();
        let fired: std::vec::Vec<bool> = (0..10).map(|_| d.evaluate(&jammed())).collect();
        assert_eq!(fired, std::vec![false, false, false, false, true, false, false, false, false, true]);
    }

    #[test]
    fn good_sample_resets_the_streak() {
        let mut d = detector();
        for _ in 0..4 {
            assert!(!d.evaluate(&jammed()));
        }
        assert!(!d.evaluate(&clean()));
        assert_eq!(d.bad_count(), 0);
        for _ in 0..4 {
            assert!(!d.evaluate(&jammed()));
        }
        assert!(d.evaluate(&jammed()));
    }

    #[test]
    fn recovery_needs_consecutive_strong_packets() {
        let mut d = detector();
        for _ in 0..4 {
            assert!(!d.record_gcs_packet(-80.0));
        }
        assert!(!d.record_gcs_packet(-90.0));
        for _ in 0..4 {
            assert!(!d.record_gcs_packet(-85.0));
        }
        assert!(d.record_gcs_packet(-85.0));
    }
}
