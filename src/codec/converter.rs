//! Converter command/status wire codec (C3).
//!
//! Builders for outbound command frames and decoders for the five status
//! responses, grounded on `original_source/zeka_control.py` and
//! `original_source/zeka_status.py`.

use super::word::{read_sword, write_word};

/// Converter operating mode, by the wire-format integer code the converter
/// itself uses in `ACB_lo` (command) and `ASB_0` (status echo).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DeviceMode {
    NoMode,
    Buck1QVoltage,
    Buck1QCurrent,
    Boost1QVoltage,
    Boost1QCurrent,
    Buck2QVoltage,
    Boost2QVoltage,
    BoostACurrentBVoltage,
}

impl DeviceMode {
    pub fn wire_code(self) -> u8 {
        match self {
            DeviceMode::NoMode => 0,
            DeviceMode::Buck1QVoltage => 1,
            DeviceMode::Buck1QCurrent => 2,
            DeviceMode::Boost1QVoltage => 3,
            DeviceMode::Boost1QCurrent => 4,
            DeviceMode::Buck2QVoltage => 5,
            DeviceMode::Boost2QVoltage => 6,
            DeviceMode::BoostACurrentBVoltage => 8,
        }
    }

    /// Unknown codes are left unmapped, so callers keep the previous
    /// shadow value instead of clobbering it with a guess.
    pub fn from_wire_code(code: u8) -> Option<DeviceMode> {
        match code {
            0 => Some(DeviceMode::NoMode),
            1 => Some(DeviceMode::Buck1QVoltage),
            2 => Some(DeviceMode::Buck1QCurrent),
            3 => Some(DeviceMode::Boost1QVoltage),
            4 => Some(DeviceMode::Boost1QCurrent),
            5 => Some(DeviceMode::Buck2QVoltage),
            6 => Some(DeviceMode::Boost2QVoltage),
            8 => Some(DeviceMode::BoostACurrentBVoltage),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceMode::NoMode => "no mode selected",
            DeviceMode::Buck1QVoltage => "Buck 1Q voltage control mode",
            DeviceMode::Buck1QCurrent => "Buck 1Q current control mode",
            DeviceMode::Boost1QVoltage => "Boost 1Q voltage control mode",
            DeviceMode::Boost1QCurrent => "Boost 1Q current control mode",
            DeviceMode::Buck2QVoltage => "Buck 2Q voltage control mode",
            DeviceMode::Boost2QVoltage => "Boost 2Q voltage control mode",
            DeviceMode::BoostACurrentBVoltage => "Boost A current B voltage control mode",
        };
        write!(f, "{s}")
    }
}

pub const OP_MAIN_CONTROL: u8 = 0x80;
pub const OP_BUCK_1Q_VOLTAGE_REF: u8 = 0x81;
pub const OP_BUCK_1Q_CURRENT_REF: u8 = 0x82;
pub const OP_BOOST_1Q_VOLTAGE_REF: u8 = 0x83;
pub const OP_BOOST_1Q_CURRENT_REF: u8 = 0x84;
pub const OP_BUCK_2Q_VOLTAGE_REF: u8 = 0x85;
pub const OP_BOOST_2Q_VOLTAGE_REF: u8 = 0x86;
pub const OP_BOOST_A_CURRENT_B_VOLTAGE_REF: u8 = 0x8B;
pub const OP_OUTPUT_CONTROL: u8 = 0x90;

pub const REQ_MAIN: u8 = 0xA0;
pub const REQ_FEEDBACK_1: u8 = 0xA1;
pub const REQ_FEEDBACK_2: u8 = 0xA2;
pub const REQ_ERROR: u8 = 0xA3;
pub const REQ_IO: u8 = 0xA4;

/// Opcodes whose status reply is expected to echo the sent payload
/// verbatim, letting the caller verify the command was accepted.
pub const ECHOED_OPCODES: &[u8] = &[
    OP_MAIN_CONTROL,
    OP_BUCK_1Q_VOLTAGE_REF,
    OP_BUCK_1Q_CURRENT_REF,
    OP_BOOST_1Q_VOLTAGE_REF,
    OP_BOOST_1Q_CURRENT_REF,
    OP_BUCK_2Q_VOLTAGE_REF,
    OP_BOOST_2Q_VOLTAGE_REF,
    OP_BOOST_A_CURRENT_B_VOLTAGE_REF,
    OP_OUTPUT_CONTROL,
];

fn status_request_frame(selector: u8) -> [u8; 8] {
    [selector, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
}

pub fn main_status_request() -> [u8; 8] {
    status_request_frame(REQ_MAIN)
}
pub fn feedback_1_status_request() -> [u8; 8] {
    status_request_frame(REQ_FEEDBACK_1)
}
pub fn feedback_2_status_request() -> [u8; 8] {
    status_request_frame(REQ_FEEDBACK_2)
}
pub fn error_status_request() -> [u8; 8] {
    status_request_frame(REQ_ERROR)
}
pub fn io_status_request() -> [u8; 8] {
    status_request_frame(REQ_IO)
}

/// Builds the 0x80 main-control frame.
pub fn build_main_control(
    precharge_delay: bool,
    reset_faults: bool,
    full_stop: bool,
    run_device: bool,
    mode: DeviceMode,
) -> [u8; 8] {
    let mut mcb_lo = 0u8;
    if precharge_delay {
        mcb_lo |= 0x01;
    }
    if full_stop {
        mcb_lo |= 0x04;
    }
    if reset_faults {
        mcb_lo |= 0x80;
    }
    let mut mcb_hi = 0u8;
    if run_device {
        mcb_hi |= 0x01;
    }
    [
        OP_MAIN_CONTROL,
        mcb_hi,
        mcb_lo,
        0x00,
        mode.wire_code(),
        0xFF,
        0xFF,
        0xFF,
    ]
}

pub fn build_buck_1q_voltage_ref(voltage: f64, current_limit: f64) -> [u8; 8] {
    let (v_hi, v_lo) = write_word(voltage, 0.1);
    let (i_hi, i_lo) = write_word(current_limit, 0.1);
    [OP_BUCK_1Q_VOLTAGE_REF, v_hi, v_lo, i_hi, i_lo, 0xFF, 0xFF, 0xFF]
}

pub fn build_buck_1q_current_ref(current: f64) -> [u8; 8] {
    let (i_hi, i_lo) = write_word(current, 0.1);
    [OP_BUCK_1Q_CURRENT_REF, i_hi, i_lo, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
}

pub fn build_boost_1q_voltage_ref(voltage: f64, current_limit: f64) -> [u8; 8] {
    let (v_hi, v_lo) = write_word(voltage, 0.1);
    let (i_hi, i_lo) = write_word(current_limit, 0.1);
    [OP_BOOST_1Q_VOLTAGE_REF, v_hi, v_lo, i_hi, i_lo, 0xFF, 0xFF, 0xFF]
}

pub fn build_boost_1q_current_ref(current: f64) -> [u8; 8] {
    let (i_hi, i_lo) = write_word(current, 0.1);
    [OP_BOOST_1Q_CURRENT_REF, i_hi, i_lo, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
}

pub fn build_buck_2q_voltage_ref(voltage: f64, i_a: f64, i_b: f64) -> [u8; 8] {
    let (v_hi, v_lo) = write_word(voltage, 0.1);
    let (ia_hi, ia_lo) = write_word(i_a, 0.1);
    let (ib_hi, ib_lo) = write_word(i_b, 0.1);
    [
        OP_BUCK_2Q_VOLTAGE_REF,
        v_hi,
        v_lo,
        ia_hi,
        ia_lo,
        ib_hi,
        ib_lo,
        0xFF,
    ]
}

pub fn build_boost_2q_voltage_ref(voltage: f64, i_a: f64, i_b: f64) -> [u8; 8] {
    let (v_hi, v_lo) = write_word(voltage, 0.1);
    let (ia_hi, ia_lo) = write_word(i_a, 0.1);
    let (ib_hi, ib_lo) = write_word(i_b, 0.1);
    [
        OP_BOOST_2Q_VOLTAGE_REF,
        v_hi,
        v_lo,
        ia_hi,
        ia_lo,
        ib_hi,
        ib_lo,
        0xFF,
    ]
}

pub fn build_boost_a_current_b_voltage_ref(voltage: f64, current: f64) -> [u8; 8] {
    let (v_hi, v_lo) = write_word(voltage, 0.1);
    let (i_hi, i_lo) = write_word(current, 0.1);
    [
        OP_BOOST_A_CURRENT_B_VOLTAGE_REF,
        v_hi,
        v_lo,
        i_hi,
        i_lo,
        0xFF,
        0xFF,
        0xFF,
    ]
}

/// Builds the reference command for whichever of the two supported
/// two-quadrant modes the gateway is configured to run in.
pub fn build_reference_for_mode(mode: DeviceMode, voltage: f64, i_a: f64, i_b: f64) -> [u8; 8] {
    match mode {
        DeviceMode::Boost2QVoltage => build_boost_2q_voltage_ref(voltage, i_a, i_b),
        _ => build_buck_2q_voltage_ref(voltage, i_a, i_b),
    }
}

/// Output-control bitfields: relays 3/4 and digital outputs 3..8.
#[derive(Clone, Copy, Debug, Default)]
pub struct OutputRequest {
    pub relay_3: bool,
    pub relay_4: bool,
    pub output_3: bool,
    pub output_4: bool,
    pub output_5: bool,
    pub output_6: bool,
    pub output_7: bool,
    pub output_8: bool,
}

pub fn build_output_control(req: OutputRequest) -> [u8; 8] {
    let mut dorcb_hi = 0u8;
    if req.relay_4 {
        dorcb_hi |= 0x80;
    }
    if req.relay_3 {
        dorcb_hi |= 0x40;
    }
    let mut dorcb_lo = 0u8;
    if req.output_8 {
        dorcb_lo |= 0x80;
    }
    if req.output_7 {
        dorcb_lo |= 0x40;
    }
    if req.output_6 {
        dorcb_lo |= 0x20;
    }
    if req.output_5 {
        dorcb_lo |= 0x10;
    }
    if req.output_4 {
        dorcb_lo |= 0x08;
    }
    if req.output_3 {
        dorcb_lo |= 0x04;
    }
    [OP_OUTPUT_CONTROL, dorcb_hi, dorcb_lo, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
}

/// Decoded 0xA0 main status response.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MainStatus {
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
}

pub fn decode_main_status(payload: &[u8; 8]) -> MainStatus {
    let msb_1 = payload[1];
    let msb_0 = payload[2];
    let asb_0 = payload[4];
    MainStatus {
        phaseback: msb_1 & 0x10 != 0,
        auto_boost: msb_1 & 0x08 != 0,
        power_limit_reached: msb_1 & 0x04 != 0,
        current_limit_reached: msb_1 & 0x02 != 0,
        voltage_limit_reached: msb_1 & 0x01 != 0,
        alarm: msb_0 & 0x80 != 0,
        full_stop: msb_0 & 0x40 != 0,
        fault: msb_0 & 0x08 != 0,
        running: msb_0 & 0x04 != 0,
        ready: msb_0 & 0x02 != 0,
        precharging: msb_0 & 0x01 != 0,
        device_mode: DeviceMode::from_wire_code(asb_0),
    }
}

/// Decoded 0xA1/0xA2 feedback response (shared layout for Side A and B).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FeedbackStatus {
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

pub fn decode_feedback_status(payload: &[u8; 8]) -> FeedbackStatus {
    FeedbackStatus {
        voltage: read_sword(payload[1], payload[2], 0.1),
        current: read_sword(payload[3], payload[4], 0.1),
        temperature: read_sword(payload[5], payload[6], 0.1),
    }
}

/// Decoded 0xA3 error/alarm response: 20 fault bits plus 4 alarm bits.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ErrorStatus {
    pub general_hardware_fault: bool,
    pub pwm_fault: bool,
    pub analog_input_fault: bool,
    pub digital_output_fault: bool,
    pub overcurrent_or_asymmetry_fault: bool,
    pub side_a_undervoltage_fault: bool,
    pub side_a_overvoltage_fault: bool,
    pub side_b_undervoltage_fault: bool,
    pub side_b_overvoltage_fault: bool,
    pub heat_sink_overtemperature_fault: bool,
    pub dc_link_precharge_timeout: bool,
    pub battery_precharge_timeout: bool,
    pub dc_link_contactor_opened_fault: bool,
    pub dc_link_contactor_closing_timeout_fault: bool,
    pub dc_link_contactor_not_opening_timeout_fault: bool,
    pub battery_contactor_opened_fault: bool,
    pub battery_contactor_closing_timeout_fault: bool,
    pub battery_contactor_not_opening_timeout_fault: bool,
    pub io_voltage_difference_fault: bool,
    pub e_stop_fault: bool,
    pub no_mode_selected_alarm: bool,
    pub reference_setpoint_adjusted_alarm: bool,
    pub can_communication_lost_alarm: bool,
    pub temperature_derating_alarm: bool,
}

impl ErrorStatus {
    /// True if any of the 20 fault bits (not counting the 4 alarm bits) is set.
    pub fn any_fault(&self) -> bool {
        self.general_hardware_fault
            || self.pwm_fault
            || self.analog_input_fault
            || self.digital_output_fault
            || self.overcurrent_or_asymmetry_fault
            || self.side_a_undervoltage_fault
            || self.side_a_overvoltage_fault
            || self.side_b_undervoltage_fault
            || self.side_b_overvoltage_fault
            || self.heat_sink_overtemperature_fault
            || self.dc_link_precharge_timeout
            || self.battery_precharge_timeout
            || self.dc_link_contactor_opened_fault
            || self.dc_link_contactor_closing_timeout_fault
            || self.dc_link_contactor_not_opening_timeout_fault
            || self.battery_contactor_opened_fault
            || self.battery_contactor_closing_timeout_fault
            || self.battery_contactor_not_opening_timeout_fault
            || self.io_voltage_difference_fault
            || self.e_stop_fault
    }
}

pub fn decode_error_status(payload: &[u8; 8]) -> ErrorStatus {
    let flt1_1 = payload[1];
    let flt1_0 = payload[2];
    let flt2_1 = payload[3];
    let flt2_0 = payload[4];
    let alrm_0 = payload[6];
    ErrorStatus {
        general_hardware_fault: flt1_1 & 0x10 != 0,
        pwm_fault: flt1_1 & 0x08 != 0,
        analog_input_fault: flt1_1 & 0x04 != 0,
        digital_output_fault: flt1_1 & 0x02 != 0,
        overcurrent_or_asymmetry_fault: flt1_1 & 0x01 != 0,
        side_a_undervoltage_fault: flt1_0 & 0x80 != 0,
        side_a_overvoltage_fault: flt1_0 & 0x40 != 0,
        side_b_undervoltage_fault: flt1_0 & 0x20 != 0,
        side_b_overvoltage_fault: flt1_0 & 0x10 != 0,
        heat_sink_overtemperature_fault: flt1_0 & 0x02 != 0,
        dc_link_precharge_timeout: flt2_1 & 0x80 != 0,
        battery_precharge_timeout: flt2_1 & 0x40 != 0,
        dc_link_contactor_opened_fault: flt2_1 & 0x20 != 0,
        dc_link_contactor_closing_timeout_fault: flt2_1 & 0x10 != 0,
        dc_link_contactor_not_opening_timeout_fault: flt2_1 & 0x08 != 0,
        battery_contactor_opened_fault: flt2_1 & 0x04 != 0,
        battery_contactor_closing_timeout_fault: flt2_1 & 0x02 != 0,
        battery_contactor_not_opening_timeout_fault: flt2_1 & 0x01 != 0,
        io_voltage_difference_fault: flt2_0 & 0x02 != 0,
        e_stop_fault: flt2_0 & 0x01 != 0,
        no_mode_selected_alarm: alrm_0 & 0x20 != 0,
        reference_setpoint_adjusted_alarm: alrm_0 & 0x10 != 0,
        can_communication_lost_alarm: alrm_0 & 0x08 != 0,
        temperature_derating_alarm: alrm_0 & 0x02 != 0,
    }
}

/// Decoded 0xA4 IO response: 2 relays, 6 digital outputs, 3 digital inputs
/// (11 bits total; the third digital input is set by the converter but
/// never initialized in the original status dictionary literal).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IoStatus {
    pub relay_3: bool,
    pub relay_4: bool,
    pub output_3: bool,
    pub output_4: bool,
    pub output_5: bool,
    pub output_6: bool,
    pub output_7: bool,
    pub output_8: bool,
    pub input_4: bool,
    pub input_5: bool,
    pub input_6: bool,
}

pub fn decode_io_status(payload: &[u8; 8]) -> IoStatus {
    let dorrb_1 = payload[1];
    let dorrb_0 = payload[2];
    let dirb_0 = payload[4];
    IoStatus {
        relay_4: dorrb_1 & 0x80 != 0,
        relay_3: dorrb_1 & 0x40 != 0,
        output_8: dorrb_0 & 0x80 != 0,
        output_7: dorrb_0 & 0x40 != 0,
        output_6: dorrb_0 & 0x20 != 0,
        output_5: dorrb_0 & 0x10 != 0,
        output_4: dorrb_0 & 0x08 != 0,
        output_3: dorrb_0 & 0x04 != 0,
        input_6: dirb_0 & 0x20 != 0,
        input_5: dirb_0 & 0x10 != 0,
        input_4: dirb_0 & 0x08 != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_control_encoding_is_byte_exact() {
        let frame = build_main_control(true, true, false, false, DeviceMode::Buck2QVoltage);
        assert_eq!(frame, [0x80, 0x00, 0x81, 0x00, 0x05, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn buck_2q_reference_encoding_is_byte_exact() {
        let frame = build_buck_2q_voltage_ref(435.0, 1.0, 2.0);
        assert_eq!(frame[0], 0x85);
        assert_eq!((frame[1], frame[2]), (0x10, 0xFE));
    }

    #[test]
    fn main_status_decodes_running_and_mode() {
        let payload = [0xA0, 0x00, 0x04, 0x00, 0x05, 0xFF, 0xFF, 0xFF];
        let status = decode_main_status(&payload);
        assert!(status.running);
        assert!(!status.fault);
        assert_eq!(status.device_mode, Some(DeviceMode::Buck2QVoltage));
    }

    #[test]
    fn error_status_decodes_overvoltage_fault() {
        let payload = [0xA3, 0x00, 0x40, 0x00, 0x00, 0xFF, 0x00, 0xFF];
        let status = decode_error_status(&payload);
        assert!(status.side_a_overvoltage_fault);
        assert!(status.any_fault());
    }

    #[test]
    fn io_status_decodes_eleventh_bit() {
        let payload = [0xA4, 0x00, 0x00, 0xFF, 0x08, 0xFF, 0xFF, 0xFF];
        let status = decode_io_status(&payload);
        assert!(status.input_4);
        assert!(!status.input_5);
    }

    #[test]
    fn unknown_device_mode_code_decodes_to_none() {
        let payload = [0xA0, 0x00, 0x00, 0x00, 0x07, 0xFF, 0xFF, 0xFF];
        assert_eq!(decode_main_status(&payload).device_mode, None);
    }
}
