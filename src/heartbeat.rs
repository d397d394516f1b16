//! Supervisor heartbeat (C7).
//!
//! Emits `[0x05]` on `0x700 + node_id` roughly every 1.1 s, signaling
//! operational state to the supervisor. Grounded on
//! `original_source/ZEKA_EVI_gateway.py`'s `EVI_heartbeat` thread, whose
//! 0.9 s sleep plus send/processing overhead rounds out to ~1.1 Hz.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use crate::bus::{Bus, RawFrame};

const HEARTBEAT_PERIOD: Duration = Duration::from_millis(900);
const HEARTBEAT_PAYLOAD: u8 = 0x05;

pub struct Heartbeat {
    bus: Arc<Bus>,
    node_id: u16,
}

impl Heartbeat {
    pub fn new(bus: Arc<Bus>, node_id: u16) -> Self {
        Heartbeat { bus, node_id }
    }

    pub fn beat_once(&self) -> crate::error::GatewayResult<()> {
        let frame = RawFrame::short(0x700 + self.node_id, &[HEARTBEAT_PAYLOAD]);
        self.bus.send(frame)
    }

    pub fn spawn(self: Arc<Self>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            info!("supervisor heartbeat thread started");
            while !stop.load(Ordering::Relaxed) {
                if let Err(e) = self.beat_once() {
                    log::error!("supervisor heartbeat: send failed: {e}");
                }
                thread::sleep(HEARTBEAT_PERIOD);
            }
            info!("supervisor heartbeat thread stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::CanTransport;
    use crate::error::{BusName, GatewayResult};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTransport(Arc<StdMutex<Vec<RawFrame>>>);

    impl CanTransport for RecordingTransport {
        fn send_raw(&self, frame: &RawFrame) -> GatewayResult<()> {
            self.0.lock().unwrap().push(*frame);
            Ok(())
        }

        fn recv_raw(&self, _timeout: Duration) -> GatewayResult<Option<RawFrame>> {
            Ok(None)
        }
    }

    #[test]
    fn beat_once_sends_a_single_byte_frame() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = RecordingTransport(sent.clone());
        let bus = Arc::new(Bus::new(Box::new(transport), BusName::Supervisor));
        let heartbeat = Heartbeat::new(bus, 0x5E);
        heartbeat.beat_once().unwrap();

        let frames = sent.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, 0x700 + 0x5E);
        assert_eq!(frames[0].len, 1);
        assert_eq!(frames[0].payload(), &[HEARTBEAT_PAYLOAD]);
    }
}
