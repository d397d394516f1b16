//! Latest supervisor-requested state, mode, grid configuration and
//! setpoints (C5). Grounded on `original_source/status_dictionaries.py`'s
//! `evi_directives_dictionary` and the update rules in
//! `original_source/ZEKA_EVI_gateway.py`'s `EVI_CAN_server`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::dispatcher::EviState;

/// Operation mode the supervisor requests on 0x200+n byte 1. Grounded on
/// `original_source/evi_semantics.py`'s `evi_system_mode_translator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemMode {
    Unknown,
    Vsi,
    PfcPower,
    PfcVoltage,
}

impl SystemMode {
    pub fn wire_code(self) -> u8 {
        match self {
            SystemMode::Unknown => 0,
            SystemMode::Vsi => 1,
            SystemMode::PfcPower => 2,
            SystemMode::PfcVoltage => 3,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<SystemMode> {
        match code {
            0 => Some(SystemMode::Unknown),
            1 => Some(SystemMode::Vsi),
            2 => Some(SystemMode::PfcPower),
            3 => Some(SystemMode::PfcVoltage),
            _ => None,
        }
    }
}

impl std::fmt::Display for SystemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SystemMode::Unknown => {
                "MODE_UNKNOWN (Operation mode is not specified, system remains in stand by state)"
            }
            SystemMode::Vsi => "MODE_VSI (Voltage source inverter (VSI) mode for V2L operation)",
            SystemMode::PfcPower => "MODE_PFC_POWER (Power factor corrector (PFC) mode for G2V/V2G operations with constant current control on battery side)",
            SystemMode::PfcVoltage => "MODE_PFC_VOLTAGE (Power factor corrector (PFC) mode for G2V/V2G operations with constant voltage control on battery side)",
        };
        write!(f, "{s}")
    }
}

/// Grid wiring configuration the supervisor requests on 0x200+n byte 2.
/// Grounded on `original_source/evi_semantics.py`'s
/// `evi_grid_conf_translator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridConf {
    Unknown,
    SinglePhaseTwoWire,
    SinglePhaseFourWire,
    ThreePhaseThreeWire,
    ThreePhaseFourWire,
}

impl GridConf {
    pub fn wire_code(self) -> u8 {
        match self {
            GridConf::Unknown => 0,
            GridConf::SinglePhaseTwoWire => 1,
            GridConf::SinglePhaseFourWire => 2,
            GridConf::ThreePhaseThreeWire => 3,
            GridConf::ThreePhaseFourWire => 4,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<GridConf> {
        match code {
            0 => Some(GridConf::Unknown),
            1 => Some(GridConf::SinglePhaseTwoWire),
            2 => Some(GridConf::SinglePhaseFourWire),
            3 => Some(GridConf::ThreePhaseThreeWire),
            4 => Some(GridConf::ThreePhaseFourWire),
            _ => None,
        }
    }
}

impl std::fmt::Display for GridConf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GridConf::Unknown => "CONF_UNKNOWN (Grid configuration is not specified, system remains in stand by state.)",
            GridConf::SinglePhaseTwoWire => "CONF_SINGLE_PHASE_TWO_WIRE (Single-phase configuration L1 as phase and L4 as neutral)",
            GridConf::SinglePhaseFourWire => "CONF_SINGLE_PHASE_FOUR_WIRE (Single-phase configuration with L1+L2 as phase and L3+L4 as neutral)",
            GridConf::ThreePhaseThreeWire => "CONF_THREE_PHASE_THREE_WIRE (Three-phase configuration without neutral wire)",
            GridConf::ThreePhaseFourWire => "CONF_THREE_PHASE_FOUR_WIRE (Three-phase configuration with neutral wire)",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SupervisorDirectives {
    pub pfc_state_request: EviState,
    pub pfc_mode_request: Option<SystemMode>,
    pub grid_conf_request: Option<GridConf>,
    pub battery_voltage_setpoint: Option<f64>,
    pub i_charge_limit: Option<f64>,
    pub i_discharge_limit: Option<f64>,
    pub update_command: bool,
    pub update_reference: bool,
    pub command_timestamp: Option<Instant>,
    pub insulation_test: bool,
}

impl Default for SupervisorDirectives {
    fn default() -> Self {
        SupervisorDirectives {
            pfc_state_request: EviState::Standby,
            pfc_mode_request: None,
            grid_conf_request: None,
            battery_voltage_setpoint: None,
            i_charge_limit: None,
            i_discharge_limit: None,
            update_command: false,
            update_reference: false,
            command_timestamp: None,
            insulation_test: false,
        }
    }
}

impl SupervisorDirectives {
    /// Applies PDO-1 (0x200+n): state/mode/grid-config requests and the
    /// battery voltage setpoint.
    pub fn apply_pdo1(
        &mut self,
        state_req: EviState,
        mode_req: SystemMode,
        grid_conf: GridConf,
        voltage_setpoint: f64,
    ) {
        if state_req != self.pfc_state_request {
            self.pfc_state_request = state_req;
            self.update_command = true;
            self.command_timestamp = Some(Instant::now());
            if state_req != EviState::PowerOn {
                self.insulation_test = false;
            }
        }
        if Some(mode_req) != self.pfc_mode_request {
            self.pfc_mode_request = Some(mode_req);
        }
        if Some(grid_conf) != self.grid_conf_request {
            self.grid_conf_request = Some(grid_conf);
        }
        if Some(voltage_setpoint) != self.battery_voltage_setpoint {
            self.battery_voltage_setpoint = Some(voltage_setpoint);
            self.update_reference = true;
        }
    }

    /// Applies PDO-2 (0x300+n): charge/discharge current limits. Returns
    /// true if either field changed.
    pub fn apply_pdo2(&mut self, i_charge_limit: f64, i_discharge_limit: f64) {
        if Some(i_charge_limit) != self.i_charge_limit {
            self.i_charge_limit = Some(i_charge_limit);
            self.update_reference = true;
        }
        if Some(i_discharge_limit) != self.i_discharge_limit {
            self.i_discharge_limit = Some(i_discharge_limit);
            self.update_reference = true;
        }
    }

    /// All three reference fields present and `update_reference` set.
    pub fn reference_ready(&self) -> bool {
        self.update_reference
            && self.battery_voltage_setpoint.is_some()
            && self.i_charge_limit.is_some()
            && self.i_discharge_limit.is_some()
    }
}

#[derive(Clone)]
pub struct SharedDirectives(Arc<Mutex<SupervisorDirectives>>);

impl SharedDirectives {
    pub fn new() -> Self {
        SharedDirectives(Arc::new(Mutex::new(SupervisorDirectives::default())))
    }

    pub fn lock(&self) -> MutexGuard<'_, SupervisorDirectives> {
        self.0.lock().expect("directives mutex poisoned")
    }
}

impl Default for SharedDirectives {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_pdo1_sets_dirty_flag_only_on_first_transition() {
        let mut directives = SupervisorDirectives::default();
        directives.apply_pdo1(EviState::PowerOn, SystemMode::PfcPower, GridConf::ThreePhaseThreeWire, 400.0);
        assert!(directives.update_command);
        directives.update_command = false;
        directives.apply_pdo1(EviState::PowerOn, SystemMode::PfcPower, GridConf::ThreePhaseThreeWire, 400.0);
        assert!(!directives.update_command);
    }

    #[test]
    fn leaving_power_on_clears_insulation_test() {
        let mut directives = SupervisorDirectives::default();
        directives.insulation_test = true;
        directives.apply_pdo1(EviState::Standby, SystemMode::Unknown, GridConf::Unknown, 0.0);
        assert!(!directives.insulation_test);
    }

    #[test]
    fn reference_ready_requires_all_three_fields() {
        let mut directives = SupervisorDirectives::default();
        directives.apply_pdo2(1.0, 2.0);
        assert!(!directives.reference_ready());
        directives.apply_pdo1(EviState::PowerOn, SystemMode::PfcPower, GridConf::ThreePhaseThreeWire, 400.0);
        assert!(directives.reference_ready());
    }
}
