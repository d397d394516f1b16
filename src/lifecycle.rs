//! Gateway bring-up, run, and graceful shutdown (C9).
//!
//! Grounded on the `try`/`except KeyboardInterrupt` block at the bottom of
//! `original_source/ZEKA_EVI_gateway.py`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info};

use crate::bus::{Bus, RawFrame, SocketCanTransport};
use crate::codec::converter;
use crate::config::GatewayConfig;
use crate::directives::SharedDirectives;
use crate::dispatcher::Dispatcher;
use crate::error::{BusName, GatewayError, GatewayResult};
use crate::heartbeat::Heartbeat;
use crate::poller::Poller;
use crate::shadow::SharedShadow;

pub struct Gateway {
    config: GatewayConfig,
    converter_bus: Arc<Bus>,
    supervisor_bus: Arc<Bus>,
    shadow: SharedShadow,
    directives: SharedDirectives,
    stop: Arc<AtomicBool>,
    poller_handle: Mutex<Option<thread::JoinHandle<()>>>,
    heartbeat_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Gateway {
    /// Opens both buses, resets the converter, and starts the poller.
    /// Returns `Err(GatewayError::InitFailure)` if the converter never
    /// answers the initial RESET.
    pub fn bring_up(config: GatewayConfig) -> GatewayResult<Self> {
        let converter_transport =
            SocketCanTransport::open(&config.converter_bus.channel, BusName::Converter)?;
        let supervisor_transport =
            SocketCanTransport::open(&config.supervisor_bus.channel, BusName::Supervisor)?;
        let converter_bus = Arc::new(Bus::new(Box::new(converter_transport), BusName::Converter));
        let supervisor_bus = Arc::new(Bus::new(Box::new(supervisor_transport), BusName::Supervisor));

        let reset_payload =
            converter::build_main_control(true, true, false, false, config.converter_mode);
        let reset_frame = RawFrame::new(config.converter_control_id(), reset_payload);
        match converter_bus.request_response(reset_frame)? {
            Some(_) => info!("converter reset acknowledged"),
            None => {
                error!("converter unreachable on initial reset");
                return Err(GatewayError::InitFailure(
                    "converter did not reply to initial reset",
                ));
            }
        }

        let shadow = SharedShadow::new();
        let directives = SharedDirectives::new();
        let stop = Arc::new(AtomicBool::new(false));

        let poller = Arc::new(Poller::new(
            converter_bus.clone(),
            shadow.clone(),
            config.converter_status_id(),
        ));
        let poller_handle = poller.spawn(stop.clone());

        thread::sleep(Duration::from_secs(1));

        let heartbeat = Arc::new(Heartbeat::new(supervisor_bus.clone(), config.supervisor_node_id));
        let heartbeat_handle = heartbeat.spawn(stop.clone());

        Ok(Gateway {
            config,
            converter_bus,
            supervisor_bus,
            shadow,
            directives,
            stop,
            poller_handle: Mutex::new(Some(poller_handle)),
            heartbeat_handle: Mutex::new(Some(heartbeat_handle)),
        })
    }

    /// Runs the supervisor dispatcher on the calling thread until `stop`
    /// is requested (e.g. by a termination signal installed by the
    /// caller). Blocks.
    pub fn run_dispatcher(&self) {
        let dispatcher = Dispatcher::new(
            self.converter_bus.clone(),
            self.supervisor_bus.clone(),
            self.shadow.clone(),
            self.directives.clone(),
            self.config.clone(),
        );
        dispatcher.run(&self.stop);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Resets the converter, joins background threads, and drops the
    /// buses. Mirrors the `except KeyboardInterrupt` cleanup in
    /// `original_source/ZEKA_EVI_gateway.py`.
    ///
    /// Takes `&self` rather than consuming the gateway: callers typically
    /// hold it behind an `Arc` shared with a termination-signal handler,
    /// so the join handles live behind an interior-mutable cell instead.
    pub fn shutdown(&self) {
        let reset_payload =
            converter::build_main_control(true, true, false, false, self.config.converter_mode);
        let reset_frame = RawFrame::new(self.config.converter_control_id(), reset_payload);
        if let Err(e) = self.converter_bus.request_response(reset_frame) {
            error!("converter reset on shutdown failed: {e}");
        }

        self.request_stop();
        if let Some(handle) = self.poller_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.heartbeat_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("gateway shut down");
    }
}
