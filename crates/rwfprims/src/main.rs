mod exit;
mod logging;
mod output;
mod provider;

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;

use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;
use crate::provider::ProviderArgs;

#[derive(Parser, Debug)]
#[command(
    name = "rwf-provider",
    version,
    about = "Single-client RWF interactive provider"
)]
struct Cli {
    /// Port to listen on.
    #[arg(short = 'p', long, env = "RWF_PROVIDER_PORT", default_value_t = rwfprims_session::DEFAULT_PORT)]
    port: u16,

    /// Seconds to run before shutting down.
    #[arg(short = 'r', long, env = "RWF_PROVIDER_RUNTIME", default_value_t = 300)]
    runtime: u64,

    /// Service name published to the consumer.
    #[arg(short = 's', long, env = "RWF_PROVIDER_SERVICE", default_value = "DIRECT_FEED")]
    service: String,

    /// Interface address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    interface: IpAddr,

    /// Ping timeout offered to consumers, in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    ping_timeout: u64,

    /// Output format.
    #[arg(long, value_name = "FORMAT")]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

impl Cli {
    fn provider_args(&self) -> ProviderArgs {
        ProviderArgs {
            interface: self.interface,
            port: self.port,
            runtime: Duration::from_secs(self.runtime),
            service: self.service.clone(),
            ping_timeout: Duration::from_secs(self.ping_timeout),
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit::SUCCESS,
                _ => exit::USAGE,
            };
            std::process::exit(code);
        }
    };
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match provider::run(cli.provider_args(), format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_provider() {
        let cli = Cli::try_parse_from(["rwf-provider"]).expect("no args should parse");
        assert_eq!(cli.port, 14002);
        assert_eq!(cli.runtime, 300);
        assert_eq!(cli.service, "DIRECT_FEED");
        assert_eq!(cli.ping_timeout, 60);
    }

    #[test]
    fn parses_short_flags() {
        let cli = Cli::try_parse_from(["rwf-provider", "-p", "15000", "-r", "10", "-s", "FEED_B"])
            .expect("short flags should parse");
        let args = cli.provider_args();
        assert_eq!(args.port, 15000);
        assert_eq!(args.runtime, Duration::from_secs(10));
        assert_eq!(args.service, "FEED_B");
    }

    #[test]
    fn rejects_unknown_flag() {
        let err = Cli::try_parse_from(["rwf-provider", "-x"]).expect_err("unknown flag should fail");
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn rejects_non_numeric_port() {
        let err = Cli::try_parse_from(["rwf-provider", "-p", "feed"])
            .expect_err("non-numeric port should fail");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }
}
