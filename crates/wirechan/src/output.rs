use std::io::{IsTerminal, Write};
use std::net::SocketAddr;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

/// Result of one `send` exchange.
#[derive(Debug, Serialize)]
pub struct SendReport {
    pub peer: String,
    pub transport: String,
    pub framing: &'static str,
    pub message: String,
    pub reply_length: i32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// One message answered by `echo`.
#[derive(Debug, Serialize)]
pub struct EchoEvent {
    pub event: &'static str,
    pub message: String,
    pub length: i32,
}

#[derive(Debug, Serialize)]
struct ListeningEvent {
    event: &'static str,
    address: String,
    port: u16,
    transport: String,
}

/// Open-file limits as the channel layer sees them.
#[derive(Debug, Serialize)]
pub struct LimitsReport {
    pub soft: Option<u64>,
    pub hard: Option<u64>,
    pub headroom: u64,
}

pub fn print_send_report(report: &SendReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PEER", "TRANSPORT", "FRAMING", "SENT", "REPLY", "BYTES OUT/IN"])
                .add_row(vec![
                    report.peer.clone(),
                    report.transport.clone(),
                    report.framing.to_string(),
                    report.message.clone(),
                    report.reply_length.to_string(),
                    format!("{}/{}", report.bytes_sent, report.bytes_received),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "peer={} transport={} framing={} sent={:?} reply={} bytes_out={} bytes_in={}",
                report.peer,
                report.transport,
                report.framing,
                report.message,
                report.reply_length,
                report.bytes_sent,
                report.bytes_received
            );
        }
        OutputFormat::Raw => print_raw(format!("{}\n", report.reply_length).as_bytes()),
    }
}

/// Announce the bound address on stdout so callers can find an
/// OS-assigned port.
pub fn print_listening(addr: SocketAddr, transport: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ListeningEvent {
            event: "listening",
            address: addr.to_string(),
            port: addr.port(),
            transport: transport.to_string(),
        }),
        OutputFormat::Raw => print_raw(format!("{}\n", addr.port()).as_bytes()),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("listening on {addr} ({transport})");
            flush_stdout();
        }
    }
}

pub fn print_echo(event: &EchoEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Raw => print_raw(format!("{}\n", event.message).as_bytes()),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("{} message={:?} length={}", event.event, event.message, event.length);
            flush_stdout();
        }
    }
}

pub fn print_limits(report: &LimitsReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LIMIT", "VALUE"])
                .add_row(vec!["soft".to_string(), limit_text(report.soft)])
                .add_row(vec!["hard".to_string(), limit_text(report.hard)])
                .add_row(vec!["headroom".to_string(), report.headroom.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "soft={} hard={} headroom={}",
                limit_text(report.soft),
                limit_text(report.hard),
                report.headroom
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
    flush_stdout();
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

fn limit_text(limit: Option<u64>) -> String {
    match limit {
        Some(value) => value.to_string(),
        None => "unlimited".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_report_json_fields() {
        let report = SendReport {
            peer: "127.0.0.1:4000".to_string(),
            transport: "stream".to_string(),
            framing: "length",
            message: "alan".to_string(),
            reply_length: 4,
            bytes_sent: 8,
            bytes_received: 4,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
        assert_eq!(value["reply_length"], 4);
        assert_eq!(value["framing"], "length");
    }

    #[test]
    fn unlimited_limit_text() {
        assert_eq!(limit_text(None), "unlimited");
        assert_eq!(limit_text(Some(1024)), "1024");
    }
}
