//! Compile-time gateway configuration.
//!
//! Reference documentation: the ZEKA-driven DC/DC converter's CAN ICD and
//! the EVI (CANopen-style charging supervisor) PDO map this gateway
//! translates between.
//!
//! There is no CLI: every value below has a baked-in default reproducing
//! `original_source/settings.py`. `GatewayConfig::from_env` is an optional
//! operational override, not a command-line surface, and is not re-read
//! after startup (hot-reconfiguration is out of scope).

use crate::codec::converter::DeviceMode;

/// Channel name, bitrate and protocol addressing for one physical bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub channel: String,
    pub bitrate: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayConfig {
    pub converter_bus: BusConfig,
    pub supervisor_bus: BusConfig,

    /// Master node ID the gateway uses when addressing the converter.
    pub converter_master_id: u16,
    /// Converter device ID on its own bus.
    pub converter_device_id: u16,
    /// Packet ID distinguishing the control message from the status
    /// request message (both share the master/device ID portion of the
    /// arbitration ID but resolve to two distinct IDs, not aliases).
    pub converter_control_packet_id: u16,
    pub converter_status_packet_id: u16,

    /// CANopen node ID the gateway impersonates on the supervisor bus.
    pub supervisor_node_id: u16,

    /// Converter operating mode the gateway commands on POWER_ON /
    /// reference updates. Either Buck-2Q-V or Boost-2Q-V.
    pub converter_mode: DeviceMode,

    /// Capability constants advertised once at startup on 0x280+n.
    pub battery_max_voltage: f64,
    pub battery_max_current: f64,
    pub grid_max_current: f64,
    pub grid_max_power: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            converter_bus: BusConfig {
                channel: "can0".to_string(),
                bitrate: 250_000,
            },
            supervisor_bus: BusConfig {
                channel: "can1".to_string(),
                bitrate: 500_000,
            },
            converter_master_id: 0x001,
            converter_device_id: 0x1,
            converter_control_packet_id: 0x1,
            converter_status_packet_id: 0x4,
            supervisor_node_id: 0x5E,
            converter_mode: DeviceMode::Buck2QVoltage,
            battery_max_voltage: 700.0,
            battery_max_current: 100.0,
            grid_max_current: 60.0,
            grid_max_power: 40_000.0,
        }
    }
}

impl GatewayConfig {
    /// Arbitration ID of the converter's control/command frames.
    pub fn converter_control_id(&self) -> u16 {
        (self.converter_master_id << 8)
            | (self.converter_device_id << 3)
            | self.converter_control_packet_id
    }

    /// Arbitration ID of the converter's status request/response frames.
    pub fn converter_status_id(&self) -> u16 {
        (self.converter_master_id << 8)
            | (self.converter_device_id << 3)
            | self.converter_status_packet_id
    }

    /// Applies `ZEKA_GW_*` environment overrides on top of the defaults.
    /// Only channel names and the supervisor node id can be overridden;
    /// everything else requires a rebuild — configuration is compile-time,
    /// not a CLI surface.
    pub fn from_env() -> Result<Self, crate::error::GatewayError> {
        let mut cfg = GatewayConfig::default();
        if let Ok(chan) = std::env::var("ZEKA_GW_CONVERTER_CHANNEL") {
            cfg.converter_bus.channel = chan;
        }
        if let Ok(chan) = std::env::var("ZEKA_GW_SUPERVISOR_CHANNEL") {
            cfg.supervisor_bus.channel = chan;
        }
        if let Ok(node) = std::env::var("ZEKA_GW_SUPERVISOR_NODE_ID") {
            cfg.supervisor_node_id = u16::from_str_radix(node.trim_start_matches("0x"), 16)
                .or_else(|_| node.parse())
                .map_err(|_| {
                    crate::error::GatewayError::ConfigError(format!(
                        "invalid ZEKA_GW_SUPERVISOR_NODE_ID: {node}"
                    ))
                })?;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arbitration_ids_match_original_wiring() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.converter_control_id(), 0x109);
        assert_eq!(cfg.converter_status_id(), 0x10C);
    }

    #[test]
    fn default_supervisor_node_is_0x5e() {
        assert_eq!(GatewayConfig::default().supervisor_node_id, 0x5E);
    }
}
