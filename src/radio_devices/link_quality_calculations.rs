//! Radio link quality utilities
//!
//! Normalises RSSI (Received Signal Strength Indicator) and SNR (Signal-to-Noise
//! Ratio) measurements onto a common 0-100 scale so they can be weighted against
//! each other in relay scoring.
//!
//! All functions are monotonic: a stronger signal never yields a lower score.

/// Minimum RSSI value for decodable signals (in dBm)
///
/// Signals weaker than this are typically below the noise floor and cannot be
/// reliably decoded. Used as the lower bound for normalisation.
pub const RSSI_MIN: f32 = -120.0;

/// Maximum RSSI value for very strong signals (in dBm)
pub const RSSI_MAX: f32 = -30.0;

/// Minimum SNR value for decodable signals (in dB)
///
/// Can be negative for LoRa due to spread spectrum processing gain.
pub const SNR_MIN: f32 = -20.0;

/// Maximum SNR value for very clean signals (in dB)
pub const SNR_MAX: f32 = 10.0;

/// Normalizes a value to a 0-100 scale based on defined min/max bounds
///
/// Clamps the input value within the specified range and linearly scales it
/// to the 0-100 output range. Values below `min` result in 0, values above
/// `max` result in 100.
///
/// # Arguments
/// * `value` - The input value to normalize (e.g., -90 for RSSI)
/// * `min` - The bottom of the input range (e.g., -120 for RSSI_MIN)
/// * `max` - The top of the input range (e.g., -30 for RSSI_MAX)
///
/// # Example
/// ```rust
/// use uav_dual_relay::radio_devices::normalize;
///
/// let quality = normalize(-75.0, -120.0, -30.0);
/// assert_eq!(quality, 50.0);
/// assert_eq!(normalize(-150.0, -120.0, -30.0), 0.0);
/// assert_eq!(normalize(-20.0, -120.0, -30.0), 100.0);
/// ```
pub fn normalize(value: f32, min: f32, max: f32) -> f32 {
    if max <= min {
        return 0.0;
    }
    let clamped_value = value.max(min).min(max);
    (clamped_value - min) * 100.0 / (max - min)
}

/// RSSI on the 0-100 scale
pub fn rssi_score(rssi: f32) -> f32 {
    normalize(rssi, RSSI_MIN, RSSI_MAX)
}

/// SNR on the 0-100 scale
pub fn snr_score(snr: f32) -> f32 {
    normalize(snr, SNR_MIN, SNR_MAX)
}

/// Usefulness of a candidate's ground link on the 0-100 scale
///
/// The RSSI score scaled by the fraction of packets that get through, so a
/// strong but lossy link ranks below a slightly weaker clean one.
///
/// # Arguments
/// * `gcs_rssi` - Candidate's GCS RSSI in dBm
/// * `gcs_loss` - Candidate's GCS packet loss in percent (clamped to 0-100)
pub fn gcs_link_score(gcs_rssi: f32, gcs_loss: f32) -> f32 {
    let delivered = (100.0 - gcs_loss.max(0.0).min(100.0)) / 100.0;
    rssi_score(gcs_rssi) * delivered
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rssi() {
        assert_eq!(rssi_score(RSSI_MIN), 0.0);
        assert_eq!(rssi_score(RSSI_MAX), 100.0);
        let mid = rssi_score((RSSI_MIN + RSSI_MAX) / 2.0);
        assert!((mid - 50.0).abs() < 1e-3);
        assert_eq!(rssi_score(-150.0), 0.0);
        assert_eq!(rssi_score(-20.0), 100.0);
    }

    #[test]
    fn test_normalize_snr() {
        assert_eq!(snr_score(SNR_MIN), 0.0);
        assert_eq!(snr_score(SNR_MAX), 100.0);
        assert_eq!(snr_score(-30.0), 0.0);
        assert_eq!(snr_score(20.0), 100.0);
    }

    #[test]
    fn degenerate_range_scores_zero() {
        assert_eq!(normalize(5.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn gcs_score_is_monotonic() {
        assert!(gcs_link_score(-60.0, 2.0) > gcs_link_score(-70.0, 2.0));
        assert!(gcs_link_score(-60.0, 1.0) > gcs_link_score(-60.0, 2.0));
        assert_eq!(gcs_link_score(-60.0, 100.0), 0.0);
        assert_eq!(gcs_link_score(RSSI_MAX, 0.0), 100.0);
    }
}
