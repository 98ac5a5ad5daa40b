use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rwfprims_session::{BindOptions, Provider, ProviderConfig};
use tracing::info;

use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_channel_info, print_summary, OutputFormat};

#[derive(Debug, Clone)]
pub struct ProviderArgs {
    pub interface: IpAddr,
    pub port: u16,
    pub runtime: Duration,
    pub service: String,
    pub ping_timeout: Duration,
}

pub fn run(args: ProviderArgs, format: OutputFormat) -> CliResult<i32> {
    let bind = BindOptions::default()
        .with_interface(args.interface)
        .with_port(args.port)
        .with_ping_timeout(args.ping_timeout);
    let config = ProviderConfig::default()
        .with_bind(bind)
        .with_runtime(args.runtime)
        .with_service_name(args.service.clone());

    let provider = Provider::bind(config).map_err(|err| session_error("bind failed", err))?;
    install_ctrlc_handler(provider.shutdown_flag())?;
    info!(
        addr = %provider.local_addr(),
        service = %args.service,
        runtime_secs = args.runtime.as_secs(),
        build_target = option_env!("RWFPRIMS_BUILD_TARGET").unwrap_or("unknown"),
        "provider started"
    );

    let summary = provider
        .run(|info| print_channel_info(info, format))
        .map_err(|err| session_error("provider failed", err))?;
    print_summary(&summary, format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(shutdown: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
