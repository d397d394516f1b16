use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};

use zeka_evi_gateway::config::GatewayConfig;
use zeka_evi_gateway::lifecycle::Gateway;

fn main() -> ExitCode {
    env_logger::init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let gateway = match Gateway::bring_up(config) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("gateway bring-up failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let gateway = Arc::new(gateway);
    let ctrlc_gateway = gateway.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("termination signal received");
        ctrlc_gateway.request_stop();
    }) {
        error!("failed to install termination handler: {e}");
        return ExitCode::FAILURE;
    }

    gateway.run_dispatcher();
    gateway.shutdown();

    ExitCode::SUCCESS
}
