//! Cached converter telemetry (C4).
//!
//! A single record mutated only inside the poller thread while holding the
//! shadow lock; readers take the same lock to get a consistent snapshot.
//! Grounded on `original_source/zeka_status.py`'s `status_dictionary` and
//! its `PREVIOUSLY_FAULTED` bookkeeping in
//! `original_source/ZEKA_EVI_gateway.py`'s SYNC handler.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::codec::converter::{DeviceMode, ErrorStatus, FeedbackStatus, IoStatus, MainStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConverterShadow {
    // Main status (0xA0)
    pub phaseback: bool,
    pub auto_boost: bool,
    pub power_limit_reached: bool,
    pub current_limit_reached: bool,
    pub voltage_limit_reached: bool,
    pub alarm: bool,
    pub full_stop: bool,
    pub fault: bool,
    pub running: bool,
    pub ready: bool,
    pub precharging: bool,
    pub device_mode: Option<DeviceMode>,

    // Feedback 1 / 2 (0xA1 / 0xA2)
    pub side_a_voltage: f64,
    pub side_a_current: f64,
    pub side_a_temp: f64,
    pub side_b_voltage: f64,
    pub side_b_current: f64,
    pub side_b_temp: f64,

    // Error/alarm (0xA3)
    pub errors: ErrorStatus,

    // IO (0xA4)
    pub io: IoStatus,

    /// Sticky latch: set whenever `fault` becomes true; cleared only when
    /// `fault` is false AND the current directive state request is STANDBY.
    pub previously_faulted: bool,

    /// True once at least one main-status reply has been received — guards
    /// against synthesizing EVI state from an all-zero default shadow.
    pub has_main_status: bool,
}

impl ConverterShadow {
    pub fn apply_main(&mut self, status: MainStatus) {
        self.phaseback = status.phaseback;
        self.auto_boost = status.auto_boost;
        self.power_limit_reached = status.power_limit_reached;
        self.current_limit_reached = status.current_limit_reached;
        self.voltage_limit_reached = status.voltage_limit_reached;
        self.alarm = status.alarm;
        self.full_stop = status.full_stop;
        self.fault = status.fault;
        self.running = status.running;
        self.ready = status.ready;
        self.precharging = status.precharging;
        if let Some(mode) = status.device_mode {
            self.device_mode = Some(mode);
        }
        self.has_main_status = true;
        if self.fault {
            self.previously_faulted = true;
        }
    }

    pub fn apply_feedback_1(&mut self, feedback: FeedbackStatus) {
        self.side_a_voltage = feedback.voltage;
        self.side_a_current = feedback.current;
        self.side_a_temp = feedback.temperature;
    }

    pub fn apply_feedback_2(&mut self, feedback: FeedbackStatus) {
        self.side_b_voltage = feedback.voltage;
        self.side_b_current = feedback.current;
        self.side_b_temp = feedback.temperature;
    }

    pub fn apply_error(&mut self, errors: ErrorStatus) {
        self.errors = errors;
    }

    pub fn apply_io(&mut self, io: IoStatus) {
        self.io = io;
    }

    /// Clears the latch if the converter is currently unfaulted and the
    /// supervisor has requested STANDBY.
    pub fn maybe_clear_latch(&mut self, requested_standby: bool) {
        if !self.fault && requested_standby {
            self.previously_faulted = false;
        }
    }
}

/// Shared handle to the shadow record, cloned into both the poller and the
/// dispatcher.
#[derive(Clone)]
pub struct SharedShadow(Arc<Mutex<ConverterShadow>>);

impl SharedShadow {
    pub fn new() -> Self {
        SharedShadow(Arc::new(Mutex::new(ConverterShadow::default())))
    }

    pub fn lock(&self) -> MutexGuard<'_, ConverterShadow> {
        self.0.lock().expect("shadow mutex poisoned")
    }

    pub fn snapshot(&self) -> ConverterShadow {
        *self.lock()
    }
}

impl Default for SharedShadow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::converter::MainStatus;

    fn faulted_status() -> MainStatus {
        MainStatus {
            fault: true,
            ..Default::default()
        }
    }

    #[test]
    fn latch_sets_when_fault_observed() {
        let mut shadow = ConverterShadow::default();
        assert!(!shadow.previously_faulted);
        shadow.apply_main(faulted_status());
        assert!(shadow.previously_faulted);
    }

    #[test]
    fn latch_stays_set_without_standby_request() {
        let mut shadow = ConverterShadow::default();
        shadow.apply_main(faulted_status());
        shadow.apply_main(MainStatus::default());
        shadow.maybe_clear_latch(false);
        assert!(shadow.previously_faulted);
    }

    #[test]
    fn latch_clears_once_unfaulted_and_standby_requested() {
        let mut shadow = ConverterShadow::default();
        shadow.apply_main(faulted_status());
        shadow.apply_main(MainStatus::default());
        shadow.maybe_clear_latch(true);
        assert!(!shadow.previously_faulted);
    }

    #[test]
    fn latch_is_not_cleared_while_still_faulted_even_with_standby() {
        let mut shadow = ConverterShadow::default();
        shadow.apply_main(faulted_status());
        shadow.maybe_clear_latch(true);
        assert!(shadow.previously_faulted);
    }
}
