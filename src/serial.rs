//! # Serial Port Abstraction
//!
//! The inter-controller UART is seen through [`SerialPort`]: a non-blocking byte
//! reader and a frame writer. On hosted targets [`SerialLink`] wires two nodes
//! together through a pair of embassy channels, one per direction.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

/// Bytes buffered per direction of a [`SerialLink`]
pub const SERIAL_QUEUE_SIZE: usize = 2048;

pub type SerialByteQueue = Channel<CriticalSectionRawMutex, u8, SERIAL_QUEUE_SIZE>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SerialError {
    /// The transmit buffer cannot take the whole frame
    Overflow,
    /// The underlying UART reported a write error
    WriteFailed,
}

#[cfg(feature = "std")]
impl core::fmt::Display for SerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SerialError::Overflow => write!(f, "serial transmit buffer full"),
            SerialError::WriteFailed => write!(f, "serial write failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SerialError {}

/// Byte-level access to the inter-controller link
pub trait SerialPort {
    /// Next received byte, if any; never blocks
    fn read_byte(&mut self) -> Option<u8>;

    /// Queues a complete frame for transmission
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError>;
}

/// One end of a channel-backed serial link
pub struct ChannelSerial<'a> {
    rx: &'a SerialByteQueue,
    tx: &'a SerialByteQueue,
}

impl<'a> ChannelSerial<'a> {
    pub fn new(rx_queue: &'a SerialByteQueue, tx_queue: &'a SerialByteQueue) -> Self {
        ChannelSerial {
            rx: rx_queue,
            tx: tx_queue,
        }
    }
}

impl SerialPort for ChannelSerial<'_> {
    fn read_byte(&mut self) -> Option<u8> {
        self.rx.try_receive().ok()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        // Half-written frames would desynchronise the peer's decoder
        if self.tx.free_capacity() < bytes.len() {
            return Err(SerialError::Overflow);
        }
        for &byte in bytes {
            self.tx.try_send(byte).map_err(|_| SerialError::Overflow)?;
        }
        Ok(())
    }
}

/// A simulated UART between a Primary and a Secondary
pub struct SerialLink {
    primary_to_secondary: SerialByteQueue,
    secondary_to_primary: SerialByteQueue,
}

impl Default for SerialLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink {
    pub const fn new() -> Self {
        SerialLink {
            primary_to_secondary: Channel::new(),
            secondary_to_primary: Channel::new(),
        }
    }

    /// The Primary's end of the link
    pub fn primary_end(&self) -> ChannelSerial<'_> {
        ChannelSerial::new(&self.secondary_to_primary, &self.primary_to_secondary)
    }

    /// The Secondary's end of the link
    pub fn secondary_end(&self) -> ChannelSerial<'_> {
        ChannelSerial::new(&self.primary_to_secondary, &self.secondary_to_primary)
    }
}
