//! Converter poller (C6).
//!
//! At a nominal 1 Hz cadence, issues the five status requests in order,
//! feeds each non-null reply to the matching decoder, and logs the full
//! shadow at debug level. Grounded on
//! `original_source/ZEKA_EVI_gateway.py`'s `ZEKA_heartbeat` thread (renamed
//! here to avoid confusion with the supervisor heartbeat, C7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::bus::Bus;
use crate::codec::converter::{
    self, decode_error_status, decode_feedback_status, decode_io_status, decode_main_status,
};
use crate::shadow::SharedShadow;

const POLL_PERIOD: Duration = Duration::from_secs(1);

pub struct Poller {
    bus: Arc<Bus>,
    shadow: SharedShadow,
    status_id: u16,
}

impl Poller {
    pub fn new(bus: Arc<Bus>, shadow: SharedShadow, status_id: u16) -> Self {
        Poller {
            bus,
            shadow,
            status_id,
        }
    }

    /// Runs one full poll cycle: five status requests, applied atomically
    /// under the shadow lock for the whole cycle so a concurrent reader
    /// never observes a partially-updated snapshot.
    pub fn poll_once(&self) {
        let mut shadow = self.shadow.lock();
        self.run_request(&mut shadow, converter::main_status_request(), |s, payload| {
            s.apply_main(decode_main_status(&payload))
        });
        self.run_request(&mut shadow, converter::feedback_1_status_request(), |s, payload| {
            s.apply_feedback_1(decode_feedback_status(&payload))
        });
        self.run_request(&mut shadow, converter::feedback_2_status_request(), |s, payload| {
            s.apply_feedback_2(decode_feedback_status(&payload))
        });
        self.run_request(&mut shadow, converter::error_status_request(), |s, payload| {
            s.apply_error(decode_error_status(&payload))
        });
        self.run_request(&mut shadow, converter::io_status_request(), |s, payload| {
            s.apply_io(decode_io_status(&payload))
        });
        debug!("converter shadow after poll: {:?}", *shadow);
    }

    fn run_request(
        &self,
        shadow: &mut crate::shadow::ConverterShadow,
        payload: [u8; 8],
        apply: impl FnOnce(&mut crate::shadow::ConverterShadow, [u8; 8]),
    ) {
        let frame = crate::bus::RawFrame::new(self.status_id, payload);
        match self.bus.request_response(frame) {
            Ok(Some(reply)) => apply(shadow, reply.data),
            Ok(None) => warn!("converter poller: no reply to selector {:#04x}", payload[0]),
            Err(e) => warn!("converter poller: send failed: {e}"),
        }
    }

    /// Spawns the poller loop on its own thread. The returned handle is
    /// joined by `lifecycle::Gateway::shutdown`.
    pub fn spawn(self: Arc<Self>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            log::info!("converter poller thread started");
            while !stop.load(Ordering::Relaxed) {
                self.poll_once();
                thread::sleep(POLL_PERIOD);
            }
            log::info!("converter poller thread stopped");
        })
    }
}
