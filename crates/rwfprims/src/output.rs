use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use rwfprims_session::{ChannelInfo, ProviderSummary, StopReason};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct Event<'a, T: Serialize> {
    event: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

fn print_json<T: Serialize>(event: &str, body: &T) {
    println!(
        "{}",
        serde_json::to_string(&Event { event, body }).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(rows: Vec<(&str, String)>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["FIELD", "VALUE"]);
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value]);
    }
    println!("{table}");
}

fn info_rows(info: &ChannelInfo) -> Vec<(&'static str, String)> {
    vec![
        (
            "peer",
            info.peer_addr
                .map_or_else(|| "-".to_string(), |addr| addr.to_string()),
        ),
        ("component", info.peer_component.clone()),
        (
            "version",
            format!("{}.{}", info.major_version, info.minor_version),
        ),
        ("ping timeout", format!("{}s", info.ping_timeout_secs)),
        ("max message size", info.max_msg_size.to_string()),
        (
            "output buffers",
            format!(
                "{}/{}",
                info.guaranteed_output_buffers, info.max_output_buffers
            ),
        ),
        ("compression", info.compression.clone()),
    ]
}

pub fn print_channel_info(info: &ChannelInfo, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json("channel_active", info),
        OutputFormat::Table => print_table(info_rows(info)),
        OutputFormat::Pretty => {
            let line = info_rows(info)
                .into_iter()
                .map(|(field, value)| format!("{}={value}", field.replace(' ', "_")))
                .collect::<Vec<_>>()
                .join(" ");
            println!("channel active: {line}");
        }
    }
}

pub fn reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::RuntimeExpired => "runtime expired",
        StopReason::Interrupted => "interrupted",
    }
}

pub fn print_summary(summary: &ProviderSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json("provider_stopped", summary),
        OutputFormat::Table => print_table(vec![
            ("reason", reason_label(summary.reason).to_string()),
            ("connected", summary.connected.to_string()),
            ("elapsed", format!("{}ms", summary.elapsed_ms)),
            ("messages", summary.messages.to_string()),
            ("arrays decoded", summary.arrays_decoded.to_string()),
            ("arrays published", summary.arrays_published.to_string()),
            ("pings sent", summary.pings_sent.to_string()),
            ("pings received", summary.pings_received.to_string()),
        ]),
        OutputFormat::Pretty => {
            println!(
                "provider stopped ({}): messages={} arrays_decoded={} pings_sent={} pings_received={}",
                reason_label(summary.reason),
                summary.messages,
                summary.arrays_decoded,
                summary.pings_sent,
                summary.pings_received
            );
        }
    }
}
