//! Radio device implementations and signal helpers
//!
//! - `simulator`: in-memory modem for hosted tests and simulations
//! - `link_quality_calculations`: RSSI/SNR normalisation used by relay scoring
//!
//! Hardware drivers implement [`crate::radio::RadioDevice`] outside this crate.

pub mod link_quality_calculations;

#[cfg(feature = "std")]
pub mod simulator;

pub use link_quality_calculations::{gcs_link_score, normalize, rssi_score, snr_score};

#[cfg(feature = "std")]
pub use simulator::{SimulatedRadio, SimulatedRadioHandle};
