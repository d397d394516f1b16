//! Supervisor dispatcher and EVI state machine (C8).
//!
//! Blocks on supervisor-bus reception, decodes directive PDOs, answers the
//! heartbeat-start SDO, and on SYNC snapshots the shadow to emit the four
//! telemetry PDOs before issuing any converter command the new directives
//! call for. Grounded on `original_source/ZEKA_EVI_gateway.py`'s
//! `EVI_CAN_server` and `original_source/evi_semantics.py`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::bus::{Bus, RawFrame};
use crate::codec::converter;
use crate::codec::word::{read_uword, write_word};
use crate::config::GatewayConfig;
use crate::directives::{GridConf, SharedDirectives, SystemMode};
use crate::shadow::{ConverterShadow, SharedShadow};

/// Synthesized charge-point state reported to the supervisor on 0x180+n,
/// and the vocabulary the supervisor itself requests on 0x200+n.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EviState {
    Init,
    Standby,
    PowerOn,
    Charge,
    SafeD,
    Reserved,
    Stopping,
    FaultAck,
}

impl EviState {
    pub fn wire_code(self) -> u8 {
        match self {
            EviState::Init => 0,
            EviState::Standby => 1,
            EviState::PowerOn => 2,
            EviState::Charge => 3,
            EviState::SafeD => 4,
            EviState::Reserved => 5,
            EviState::Stopping => 6,
            EviState::FaultAck => 8,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<EviState> {
        match code {
            0 => Some(EviState::Init),
            1 => Some(EviState::Standby),
            2 => Some(EviState::PowerOn),
            3 => Some(EviState::Charge),
            4 => Some(EviState::SafeD),
            5 => Some(EviState::Reserved),
            6 => Some(EviState::Stopping),
            8 => Some(EviState::FaultAck),
            _ => None,
        }
    }
}

impl std::fmt::Display for EviState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EviState::Init => "STATE_INIT (system is starting)",
            EviState::Standby => "STATE_STANDBY (power is off, system waits a request)",
            EviState::PowerOn => "STATE_POWER_ON (system ready to start)",
            EviState::Charge => "STATE_CHARGE (charge is ongoing)",
            EviState::SafeD => "STATE_SAFE_D (critical fault, system halted until user action)",
            EviState::Reserved => "STATE_RESERVED (for future use)",
            EviState::Stopping => "STATE_STOPPING (converter is stopping and power is being killed off)",
            EviState::FaultAck => "STATE_FAULT_ACK (fault acknowledgement)",
        };
        write!(f, "{s}")
    }
}

const SYNC_ID: u16 = 0x80;
const SDO_ACK_PAYLOAD: [u8; 8] = [0x3C, 0x10, 0x0A, 0x01, 0, 0, 0, 0];

/// Synthesizes the EVI state to report: fault and running take priority
/// over the supervisor's last requested state, which otherwise passes
/// through unchanged. Before any main-status reply has ever been received
/// the shadow is all-zero, which would otherwise read as a benign
/// STANDBY; report INIT instead so a supervisor can't mistake "never
/// polled yet" for "converter idle and healthy".
pub fn synthesize_state(shadow: &ConverterShadow, last_request: EviState) -> EviState {
    if !shadow.has_main_status {
        EviState::Init
    } else if shadow.fault {
        EviState::SafeD
    } else if shadow.running {
        if last_request == EviState::PowerOn {
            EviState::PowerOn
        } else {
            EviState::Charge
        }
    } else if shadow.ready {
        EviState::PowerOn
    } else if shadow.previously_faulted {
        EviState::FaultAck
    } else {
        EviState::Standby
    }
}

fn pack_word_le(value: f64, scale: f64) -> [u8; 2] {
    let (hi, lo) = write_word(value, scale);
    [lo, hi]
}

pub struct Dispatcher {
    converter_bus: Arc<Bus>,
    supervisor_bus: Arc<Bus>,
    shadow: SharedShadow,
    directives: SharedDirectives,
    config: GatewayConfig,
    capability_pdo: [u8; 8],
}

impl Dispatcher {
    pub fn new(
        converter_bus: Arc<Bus>,
        supervisor_bus: Arc<Bus>,
        shadow: SharedShadow,
        directives: SharedDirectives,
        config: GatewayConfig,
    ) -> Self {
        let mut capability_pdo = [0u8; 8];
        capability_pdo[0..2].copy_from_slice(&pack_word_le(config.battery_max_voltage, 0.1));
        capability_pdo[2..4].copy_from_slice(&pack_word_le(config.battery_max_current, 0.1));
        capability_pdo[4..6].copy_from_slice(&pack_word_le(config.grid_max_current, 0.1));
        capability_pdo[6..8].copy_from_slice(&pack_word_le(config.grid_max_power, 10.0));
        Dispatcher {
            converter_bus,
            supervisor_bus,
            shadow,
            directives,
            config,
            capability_pdo,
        }
    }

    fn node(&self) -> u16 {
        self.config.supervisor_node_id
    }

    /// Blocks on the supervisor bus and handles frames until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        info!("supervisor dispatcher thread started");
        let node = self.node();
        while !stop.load(Ordering::Relaxed) {
            let frame = match self.supervisor_bus.recv(Duration::from_secs(1)) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    warn!("supervisor dispatcher: receive failed: {e}");
                    continue;
                }
            };

            if frame.id == 0x200 + node {
                self.handle_pdo1(&frame);
            } else if frame.id == 0x300 + node {
                self.handle_pdo2(&frame);
            } else if frame.id == 0x600 + node {
                self.handle_heartbeat_start(node);
            } else if frame.id == SYNC_ID {
                self.handle_sync(node);
            }

            self.dispatch_directive_commands();
        }
        info!("supervisor dispatcher thread stopped");
    }

    fn handle_pdo1(&self, frame: &RawFrame) {
        let data = frame.data;
        let Some(state_req) = EviState::from_wire_code(data[0]) else {
            warn!("supervisor dispatcher: unknown state request code {:#04x}", data[0]);
            return;
        };
        let Some(mode_req) = SystemMode::from_wire_code(data[1]) else {
            warn!("supervisor dispatcher: unknown mode request code {:#04x}", data[1]);
            return;
        };
        let Some(grid_conf) = GridConf::from_wire_code(data[2]) else {
            warn!("supervisor dispatcher: unknown grid conf request code {:#04x}", data[2]);
            return;
        };
        let voltage_setpoint = read_uword(data[7], data[6], 0.1);
        let mut directives = self.directives.lock();
        let previous_state = directives.pfc_state_request;
        let previous_mode = directives.pfc_mode_request;
        let previous_grid_conf = directives.grid_conf_request;
        directives.apply_pdo1(state_req, mode_req, grid_conf, voltage_setpoint);
        if directives.pfc_state_request != previous_state {
            info!("supervisor updated state request to {}", state_req);
        }
        if directives.pfc_mode_request != previous_mode {
            info!("supervisor updated mode request to {}", mode_req);
        }
        if directives.grid_conf_request != previous_grid_conf {
            info!("supervisor updated grid conf request to {}", grid_conf);
        }
    }

    fn handle_pdo2(&self, frame: &RawFrame) {
        let data = frame.data;
        let i_charge = read_uword(data[1], data[0], 0.1);
        let i_discharge = read_uword(data[3], data[2], 0.1);
        self.directives.lock().apply_pdo2(i_charge, i_discharge);
    }

    fn handle_heartbeat_start(&self, node: u16) {
        let reply = RawFrame::new(0x580 + node, SDO_ACK_PAYLOAD);
        if let Err(e) = self.supervisor_bus.send(reply) {
            warn!("supervisor dispatcher: SDO ack send failed: {e}");
        }
    }

    fn handle_sync(&self, node: u16) {
        let (shadow, last_request) = {
            let mut shadow = self.shadow.lock();
            let directives = self.directives.lock();
            let requested_standby = directives.pfc_state_request == EviState::Standby;
            shadow.maybe_clear_latch(requested_standby);
            (*shadow, directives.pfc_state_request)
        };

        let (mode_req, grid_conf_req) = {
            let directives = self.directives.lock();
            (directives.pfc_mode_request, directives.grid_conf_request)
        };

        if let (Some(mode), Some(grid_conf)) = (mode_req, grid_conf_req) {
            let state = synthesize_state(&shadow, last_request);
            let db1 = ((grid_conf.wire_code() << 5) | (mode.wire_code() << 3)) & 0xFF;
            let payload = [state.wire_code(), db1, 0, 0, 0, 0, 0, 0];
            self.send_supervisor(0x180 + node, payload);
        }

        self.send_supervisor(0x280 + node, self.capability_pdo);

        let side_b_power = (shadow.side_b_voltage * shadow.side_b_current * 10.0).round() / 10.0;
        let mut grid_telemetry = [0u8; 8];
        grid_telemetry[0..2].copy_from_slice(&pack_word_le(shadow.side_b_voltage, 0.1));
        grid_telemetry[2..4].copy_from_slice(&pack_word_le(shadow.side_b_current, 0.1));
        grid_telemetry[4..6].copy_from_slice(&pack_word_le(side_b_power, 10.0));
        grid_telemetry[6..8].copy_from_slice(&pack_word_le(0.0, 10.0));
        self.send_supervisor(0x360 + node, grid_telemetry);

        let side_a_power = (shadow.side_a_voltage * shadow.side_a_current * 10.0).round() / 10.0;
        let mut battery_telemetry = [0u8; 8];
        battery_telemetry[0..2].copy_from_slice(&pack_word_le(shadow.side_a_voltage, 0.1));
        battery_telemetry[2..4].copy_from_slice(&pack_word_le(shadow.side_a_current, 0.1));
        battery_telemetry[4..6].copy_from_slice(&pack_word_le(side_a_power, 10.0));
        battery_telemetry[6..8]
            .copy_from_slice(&pack_word_le(shadow.side_a_current.abs(), 0.1));
        self.send_supervisor(0x460 + node, battery_telemetry);
    }

    fn send_supervisor(&self, id: u16, payload: [u8; 8]) {
        if let Err(e) = self.supervisor_bus.send(RawFrame::new(id, payload)) {
            warn!("supervisor dispatcher: send to {id:#05x} failed: {e}");
        }
    }

    /// Issues converter commands for any directive changes observed while
    /// handling the frame just processed. Runs after telemetry emission on
    /// a SYNC pass, so a supervisor observing both never sees a command
    /// take effect before the telemetry that preceded it.
    fn dispatch_directive_commands(&self) {
        let snapshot = {
            let directives = self.directives.lock();
            (
                directives.reference_ready(),
                directives.battery_voltage_setpoint,
                directives.i_charge_limit,
                directives.i_discharge_limit,
                directives.insulation_test,
                directives.pfc_state_request,
                directives.update_command,
            )
        };
        let (reference_ready, voltage, i_charge, i_discharge, insulation_test, state_request, update_command) =
            snapshot;

        if reference_ready {
            let voltage = voltage.unwrap();
            let i_charge = i_charge.unwrap();
            let i_discharge = i_discharge.unwrap();
            self.send_reference(voltage, i_charge, i_discharge);
            self.directives.lock().update_reference = false;

            if insulation_test && voltage != 0.0 {
                info!("ending insulation test");
                self.directives.lock().insulation_test = false;
                self.send_main_control(true, false, false, true);
            }
            if state_request == EviState::PowerOn && voltage == 0.0 {
                info!("starting insulation test");
                self.directives.lock().insulation_test = true;
                self.send_main_control(true, false, false, false);
            }
        }

        if update_command {
            match state_request {
                EviState::Standby => self.send_main_control(true, true, false, false),
                EviState::PowerOn => self.send_main_control(true, false, false, true),
                EviState::Charge => {}
                EviState::FaultAck => self.send_main_control(true, true, false, false),
                _ => {}
            }
            self.directives.lock().update_command = false;
        }
    }

    fn send_reference(&self, voltage: f64, i_charge: f64, i_discharge: f64) {
        let payload =
            converter::build_reference_for_mode(self.config.converter_mode, voltage, i_charge, i_discharge);
        self.send_converter_command(payload);
    }

    fn send_main_control(&self, precharge_delay: bool, reset_faults: bool, full_stop: bool, run_device: bool) {
        let payload = converter::build_main_control(
            precharge_delay,
            reset_faults,
            full_stop,
            run_device,
            self.config.converter_mode,
        );
        self.send_converter_command(payload);
    }

    fn send_converter_command(&self, payload: [u8; 8]) {
        let control_id = self.config.converter_control_id();
        let frame = RawFrame::new(control_id, payload);
        match self.converter_bus.request_response(frame) {
            Ok(Some(reply)) if converter::ECHOED_OPCODES.contains(&payload[0]) => {
                if reply.data != payload {
                    log::error!(
                        "converter did not echo command {:#04x}: sent {:02x?}, got {:02x?}",
                        payload[0],
                        payload,
                        reply.data
                    );
                }
            }
            Ok(Some(_)) | Ok(None) => {}
            Err(e) => warn!("converter command {:#04x} failed: {e}", payload[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shadow_with(fault: bool, running: bool, ready: bool, previously_faulted: bool) -> ConverterShadow {
        ConverterShadow {
            fault,
            running,
            ready,
            previously_faulted,
            has_main_status: true,
            ..Default::default()
        }
    }

    #[test]
    fn running_with_power_on_request_synthesizes_power_on() {
        let shadow = shadow_with(false, true, false, false);
        assert_eq!(synthesize_state(&shadow, EviState::PowerOn), EviState::PowerOn);
    }

    #[test]
    fn fault_always_synthesizes_safe_d() {
        let shadow = shadow_with(true, true, true, true);
        assert_eq!(synthesize_state(&shadow, EviState::Charge), EviState::SafeD);
    }

    #[test]
    fn dormant_with_latch_synthesizes_fault_ack() {
        let shadow = shadow_with(false, false, false, true);
        assert_eq!(synthesize_state(&shadow, EviState::Standby), EviState::FaultAck);
    }

    #[test]
    fn running_with_charge_request_synthesizes_charge() {
        let shadow = shadow_with(false, true, false, false);
        assert_eq!(synthesize_state(&shadow, EviState::Charge), EviState::Charge);
    }

    #[test]
    fn dormant_without_latch_synthesizes_standby() {
        let shadow = shadow_with(false, false, false, false);
        assert_eq!(synthesize_state(&shadow, EviState::Standby), EviState::Standby);
    }

    #[test]
    fn no_main_status_yet_synthesizes_init_regardless_of_other_fields() {
        let shadow = ConverterShadow {
            running: true,
            ready: true,
            ..Default::default()
        };
        assert_eq!(synthesize_state(&shadow, EviState::Charge), EviState::Init);
    }

    mod ordering {
        use super::*;
        use crate::bus::CanTransport;
        use crate::config::GatewayConfig;
        use crate::error::{BusName, GatewayResult};
        use std::collections::VecDeque;
        use std::sync::Mutex as StdMutex;
        use std::thread;

        /// Records every frame sent on either bus into one shared, tagged
        /// log, so cross-bus send order can be asserted on.
        struct TaggedRecorder {
            tag: &'static str,
            log: Arc<StdMutex<Vec<(&'static str, u16)>>>,
            replies: StdMutex<VecDeque<Option<RawFrame>>>,
        }

        impl CanTransport for TaggedRecorder {
            fn send_raw(&self, frame: &RawFrame) -> GatewayResult<()> {
                self.log.lock().unwrap().push((self.tag, frame.id));
                Ok(())
            }

            fn recv_raw(&self, _timeout: Duration) -> GatewayResult<Option<RawFrame>> {
                Ok(self.replies.lock().unwrap().pop_front().flatten())
            }
        }

        #[test]
        fn sync_pass_emits_telemetry_before_any_directive_driven_command() {
            let log: Arc<StdMutex<Vec<(&'static str, u16)>>> = Arc::new(StdMutex::new(Vec::new()));

            let config = GatewayConfig::default();
            let node = config.supervisor_node_id;

            let supervisor_transport = TaggedRecorder {
                tag: "supervisor",
                log: log.clone(),
                replies: StdMutex::new(VecDeque::from(vec![Some(RawFrame::new(SYNC_ID, [0; 8]))])),
            };
            let converter_transport = TaggedRecorder {
                tag: "converter",
                log: log.clone(),
                replies: StdMutex::new(VecDeque::from(vec![None])),
            };

            let converter_bus = Arc::new(Bus::new(Box::new(converter_transport), BusName::Converter));
            let supervisor_bus = Arc::new(Bus::new(Box::new(supervisor_transport), BusName::Supervisor));

            let shadow = SharedShadow::new();
            let directives = SharedDirectives::new();
            {
                let mut d = directives.lock();
                d.pfc_mode_request = Some(SystemMode::PfcPower);
                d.grid_conf_request = Some(GridConf::ThreePhaseThreeWire);
                d.update_command = true;
            }

            let dispatcher = Dispatcher::new(converter_bus, supervisor_bus, shadow, directives, config);

            let stop = AtomicBool::new(false);
            thread::scope(|s| {
                let handle = s.spawn(|| dispatcher.run(&stop));
                thread::sleep(Duration::from_millis(100));
                stop.store(true, Ordering::Relaxed);
                handle.join().unwrap();
            });

            let sent = log.lock().unwrap();
            let supervisor_ids: Vec<u16> = sent
                .iter()
                .filter(|(tag, _)| *tag == "supervisor")
                .map(|(_, id)| *id)
                .collect();
            assert_eq!(
                supervisor_ids,
                vec![0x180 + node, 0x280 + node, 0x360 + node, 0x460 + node]
            );

            let converter_index = sent.iter().position(|(tag, _)| *tag == "converter");
            assert_eq!(converter_index, Some(sent.len() - 1));
        }
    }
}
