//! Radio completion flags.
//!
//! The interrupt handler only sets a flag (after clearing the modem's IRQ status
//! register); the node loop takes each flag once per turn. One producer and one
//! consumer per flag, so plain atomic loads and stores are enough.

use core::sync::atomic::{AtomicBool, Ordering};

/// RX-done, TX-done and CAD-done events of one radio
#[derive(Default)]
pub struct RadioIrqFlags {
    rx_done: AtomicBool,
    tx_done: AtomicBool,
    cad_done: AtomicBool,
}

fn take(flag: &AtomicBool) -> bool {
    if flag.load(Ordering::Acquire) {
        flag.store(false, Ordering::Release);
        true
    } else {
        false
    }
}

impl RadioIrqFlags {
    pub const fn new() -> Self {
        RadioIrqFlags {
            rx_done: AtomicBool::new(false),
            tx_done: AtomicBool::new(false),
            cad_done: AtomicBool::new(false),
        }
    }

    pub fn signal_rx_done(&self) {
        self.rx_done.store(true, Ordering::Release);
    }

    pub fn signal_tx_done(&self) {
        self.tx_done.store(true, Ordering::Release);
    }

    pub fn signal_cad_done(&self) {
        self.cad_done.store(true, Ordering::Release);
    }

    pub fn take_rx_done(&self) -> bool {
        take(&self.rx_done)
    }

    pub fn take_tx_done(&self) -> bool {
        take(&self.tx_done)
    }

    pub fn take_cad_done(&self) -> bool {
        take(&self.cad_done)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn each_event_is_taken_once() {
        let flags = RadioIrqFlags::new();
        assert!(!flags.take_rx_done());
        flags.signal_rx_done();
        flags.signal_rx_done();
        assert!(flags.take_rx_done());
        assert!(!flags.take_rx_done());
    }

    #[test]
    fn flags_are_independent() {
        let flags = RadioIrqFlags::new();
        flags.signal_tx_done();
        assert!(!flags.take_cad_done());
        assert!(!flags.take_rx_done());
        assert!(flags.take_tx_done());
        flags.signal_cad_done();
        assert!(flags.take_cad_done());
    }

    #[test]
    fn flags_can_be_shared_with_an_interrupt_context() {
        static FLAGS: RadioIrqFlags = RadioIrqFlags::new();
        std::thread::spawn(|| FLAGS.signal_rx_done()).join().unwrap();
        assert!(FLAGS.take_rx_done());
    }
}
