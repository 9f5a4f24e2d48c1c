//! # Radio Device Simulator - In-Memory Modem
//!
//! A hosted stand-in for a modem driver, used by tests and desktop simulations.
//!
//! ## Architecture
//!
//! The simulator is split in two halves sharing one state block:
//!
//! - **SimulatedRadio**: implements [`RadioDevice`] and is owned by a node runtime
//! - **SimulatedRadioHandle**: kept by the test harness to inject receptions, script
//!   CAD results and failures, and inspect what was transmitted
//!
//! Injected frames raise the RX-done flag in the shared [`RadioIrqFlags`], exactly as
//! a modem interrupt would; transmissions and CAD runs raise TX-done and CAD-done.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec::Vec;

use log::log;

use crate::radio::{CadResult, RadioDevice, RadioDeviceError, RadioFrame, RadioIrqFlags, ReceivedFrame};
use crate::RADIO_FRAME_SIZE;

#[derive(Default)]
struct SimulatorState {
    rx_queue: VecDeque<ReceivedFrame>,
    transmitted: Vec<Vec<u8>>,
    cad_script: VecDeque<CadResult>,
    cad_count: u32,
    pending_send_failures: u32,
    pending_set_rx_failures: u32,
    rx_armed: bool,
    recoveries: u32,
}

type SharedState = Arc<Mutex<SimulatorState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SimulatorState> {
    // A panicking test thread must not hide the recorded state from the others
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulated modem owned by a node runtime
pub struct SimulatedRadio {
    state: SharedState,
    irq: Arc<RadioIrqFlags>,
}

/// Test-side control of a [`SimulatedRadio`]
#[derive(Clone)]
pub struct SimulatedRadioHandle {
    state: SharedState,
    irq: Arc<RadioIrqFlags>,
}

impl SimulatedRadio {
    pub fn new() -> (SimulatedRadio, SimulatedRadioHandle) {
        let state: SharedState = Arc::new(Mutex::new(SimulatorState {
            rx_armed: true,
            ..SimulatorState::default()
        }));
        let irq = Arc::new(RadioIrqFlags::new());
        (
            SimulatedRadio {
                state: state.clone(),
                irq: irq.clone(),
            },
            SimulatedRadioHandle { state, irq },
        )
    }

    /// Interrupt flags raised by this radio
    pub fn irq_flags(&self) -> Arc<RadioIrqFlags> {
        self.irq.clone()
    }
}

impl RadioDevice for SimulatedRadio {
    async fn send(&mut self, data: &[u8]) -> Result<(), RadioDeviceError> {
        let mut state = lock(&self.state);
        state.rx_armed = false;
        if state.pending_send_failures > 0 {
            state.pending_send_failures -= 1;
            return Err(RadioDeviceError::TransmissionFailed);
        }
        if data.len() > RADIO_FRAME_SIZE {
            return Err(RadioDeviceError::FrameTooLarge);
        }
        state.transmitted.push(data.to_vec());
        self.irq.signal_tx_done();
        Ok(())
    }

    fn receive(&mut self) -> Option<ReceivedFrame> {
        lock(&self.state).rx_queue.pop_front()
    }

    async fn cad(&mut self) -> Result<CadResult, RadioDeviceError> {
        let mut state = lock(&self.state);
        state.cad_count += 1;
        state.rx_armed = false;
        let result = state.cad_script.pop_front().unwrap_or(CadResult::Free);
        self.irq.signal_cad_done();
        Ok(result)
    }

    fn set_rx(&mut self) -> Result<(), RadioDeviceError> {
        let mut state = lock(&self.state);
        if state.pending_set_rx_failures > 0 {
            state.pending_set_rx_failures -= 1;
            return Err(RadioDeviceError::RxStartFailed);
        }
        state.rx_armed = true;
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), RadioDeviceError> {
        let mut state = lock(&self.state);
        state.recoveries += 1;
        state.rx_armed = true;
        log!(log::Level::Info, "Simulated radio recovered");
        Ok(())
    }
}

impl SimulatedRadioHandle {
    /// Queues a frame as if it had been received over the air
    pub fn inject(&self, data: &[u8], rssi: f32, snr: f32) {
        let mut frame = RadioFrame::new();
        if frame.extend_from_slice(data).is_err() {
            log::warn!("Simulated reception of {} bytes exceeds the radio frame size, ignored", data.len());
            return;
        }
        lock(&self.state).rx_queue.push_back(ReceivedFrame { data: frame, rssi, snr });
        self.irq.signal_rx_done();
    }

    /// Every frame transmitted so far, oldest first
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        lock(&self.state).transmitted.clone()
    }

    /// Returns and forgets the frames transmitted so far
    pub fn take_transmitted(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut lock(&self.state).transmitted)
    }

    /// Results for the next CAD runs; the channel reads free once the script is exhausted
    pub fn script_cad(&self, results: &[CadResult]) {
        lock(&self.state).cad_script.extend(results.iter().copied());
    }

    pub fn cad_count(&self) -> u32 {
        lock(&self.state).cad_count
    }

    pub fn fail_next_send(&self) {
        lock(&self.state).pending_send_failures += 1;
    }

    pub fn fail_next_set_rx(&self) {
        lock(&self.state).pending_set_rx_failures += 1;
    }

    pub fn rx_armed(&self) -> bool {
        lock(&self.state).rx_armed
    }

    pub fn recoveries(&self) -> u32 {
        lock(&self.state).recoveries
    }

    pub fn irq_flags(&self) -> Arc<RadioIrqFlags> {
        self.irq.clone()
    }
}
