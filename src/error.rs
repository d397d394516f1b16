//! Crate-wide error type.
//!
//! Only genuine failures are represented here. A missing converter reply
//! or a command echo mismatch are *data*, not errors — they are logged
//! and folded into `Ok(None)` / a flagged decode result by the callers in
//! `poller` and `dispatcher`, never turned into a `GatewayError`.

use thiserror::Error;

/// Identifies which of the two physical buses an error originated on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusName {
    Converter,
    Supervisor,
}

impl std::fmt::Display for BusName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusName::Converter => write!(f, "converter"),
            BusName::Supervisor => write!(f, "supervisor"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{bus} bus: failed to open CAN socket: {source}")]
    BusOpen {
        bus: BusName,
        #[source]
        source: std::io::Error,
    },

    #[error("{bus} bus: send failed: {source}")]
    BusSend {
        bus: BusName,
        #[source]
        source: std::io::Error,
    },

    #[error("{bus} bus: receive failed: {source}")]
    BusRecv {
        bus: BusName,
        #[source]
        source: std::io::Error,
    },

    #[error("gateway initialization failed: {0}")]
    InitFailure(&'static str),

    #[error("invalid configuration override: {0}")]
    ConfigError(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
