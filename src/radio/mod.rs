//! # Radio Abstraction
//!
//! The modem driver is an external collaborator. This module fixes the interface the
//! relay core expects from it and the discipline used on top of it:
//!
//! - `RadioDevice`: transmit, non-blocking receive, channel activity detection and
//!   receive-mode control
//! - `RadioIrqFlags`: completion events raised from interrupt context and drained
//!   once per loop turn
//! - `RadioTransmitter`: CAD-gated, time-bounded transmission with the
//!   return-to-RX and recovery path
//!
//! Hardware drivers live outside this crate; `radio_devices::simulator` provides an
//! in-memory implementation for hosted tests.

pub mod irq;
pub mod transmitter;

use heapless::Vec;

use crate::RADIO_FRAME_SIZE;

pub use irq::RadioIrqFlags;
pub use transmitter::{RadioTransmitter, TransmitOutcome, TransmitStats};

/// One radio frame
pub type RadioFrame = Vec<u8, RADIO_FRAME_SIZE>;

/// A frame taken from the modem with its link metrics
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ReceivedFrame {
    pub data: RadioFrame,
    pub rssi: f32,
    pub snr: f32,
}

/// Result of a clear-channel assessment
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CadResult {
    Free,
    Busy,
}

/// Radio device operation errors
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RadioDeviceError {
    /// Device was not initialized before attempting an operation
    NotInitialized,
    /// Failed to transmit a frame
    TransmissionFailed,
    /// Failed to read a received frame
    ReceiveFailed,
    /// Channel activity detection failed
    CadFailed,
    /// Modem did not return to continuous receive
    RxStartFailed,
    /// Frame exceeds the modem's buffer
    FrameTooLarge,
}

#[cfg(feature = "std")]
impl core::fmt::Display for RadioDeviceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RadioDeviceError::NotInitialized => write!(f, "radio device not initialized"),
            RadioDeviceError::TransmissionFailed => write!(f, "radio transmission failed"),
            RadioDeviceError::ReceiveFailed => write!(f, "radio receive failed"),
            RadioDeviceError::CadFailed => write!(f, "channel activity detection failed"),
            RadioDeviceError::RxStartFailed => write!(f, "failed to restart continuous receive"),
            RadioDeviceError::FrameTooLarge => write!(f, "frame exceeds radio buffer"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RadioDeviceError {}

/// Interface of a half-duplex modem driver
///
/// Initialization is not part of this trait: pin assignment, SPI setup and
/// modulation parameters are specific to each driver.
///
/// # Examples
/// ```rust,ignore
/// use uav_dual_relay::radio::{CadResult, RadioDevice, RadioDeviceError};
///
/// async fn send_if_clear<R: RadioDevice>(radio: &mut R, frame: &[u8]) -> Result<(), RadioDeviceError> {
///     if radio.cad().await? == CadResult::Free {
///         radio.send(frame).await?;
///     }
///     radio.set_rx()
/// }
/// ```
pub trait RadioDevice {
    /// Transmits one frame and resolves when the modem reports TX done
    async fn send(&mut self, data: &[u8]) -> Result<(), RadioDeviceError>;

    /// Takes the next received frame, if one is waiting
    fn receive(&mut self) -> Option<ReceivedFrame>;

    /// Listens briefly for activity on the channel
    async fn cad(&mut self) -> Result<CadResult, RadioDeviceError>;

    /// Puts the modem back into continuous receive
    fn set_rx(&mut self) -> Result<(), RadioDeviceError>;

    /// Resets and reconfigures the modem after `set_rx` failed
    async fn recover(&mut self) -> Result<(), RadioDeviceError>;
}
