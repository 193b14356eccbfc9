use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use chiplink_frame::{hex_dump, BitMatrix, Packet, BITS_PER_CHIP, CHIP_COUNT};
use chiplink_scan::ScanReport;
use chiplink_session::{ConnectionState, LinkEvent};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One link event as printed: kind plus a human-readable detail.
fn event_summary(event: &LinkEvent) -> (&'static str, String) {
    match event {
        LinkEvent::Log { message } => ("log", message.clone()),
        LinkEvent::Warning { title, message } => ("warning", format!("{title}: {message}")),
        LinkEvent::State { state } => ("state", state.to_string()),
        LinkEvent::Ack => ("ack", "controller acknowledged".to_string()),
        LinkEvent::Data { hex } => ("data", hex.clone()),
        LinkEvent::OutputSet { chip, bit } => ("output_set", format!("chip {chip} bit {bit}")),
    }
}

pub fn print_event(event: &LinkEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
            if let serde_json::Value::Object(map) = &mut value {
                map.insert("timestamp".into(), now_unix_seconds().into());
            }
            println!("{value}");
        }
        OutputFormat::Table => {
            let (kind, detail) = event_summary(event);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "DETAIL"])
                .add_row(vec![kind.to_string(), detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let (kind, detail) = event_summary(event);
            println!("[{kind}] {detail}");
        }
        OutputFormat::Raw => {
            println!("{}", event_summary(event).1);
        }
    }
}

#[derive(Serialize)]
struct ScanOutput {
    local: String,
    port: u16,
    found: Option<String>,
    launched: usize,
    elapsed_ms: u64,
}

impl From<&ScanReport> for ScanOutput {
    fn from(report: &ScanReport) -> Self {
        Self {
            local: report.local.to_string(),
            port: report.port,
            found: report.found.map(|ip| ip.to_string()),
            launched: report.launched,
            elapsed_ms: report.elapsed.as_millis() as u64,
        }
    }
}

pub fn print_scan(report: &ScanReport, format: OutputFormat) {
    let out = ScanOutput::from(report);
    let found = out.found.clone().unwrap_or_else(|| "-".to_string());
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SUBNET OF", "PORT", "FOUND", "PROBED", "ELAPSED"])
                .add_row(vec![
                    out.local.clone(),
                    out.port.to_string(),
                    found,
                    out.launched.to_string(),
                    format!("{}ms", out.elapsed_ms),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match &out.found {
            Some(ip) => println!("controller found at {ip}:{} ({}ms)", out.port, out.elapsed_ms),
            None => println!(
                "no controller on {}/24 port {} ({} hosts probed)",
                out.local, out.port, out.launched
            ),
        },
        OutputFormat::Raw => {
            if let Some(ip) = &out.found {
                println!("{ip}");
            }
        }
    }
}

#[derive(Serialize)]
struct StatusOutput {
    state: ConnectionState,
    peer: Option<String>,
    auto_send: bool,
    set_count: usize,
    chips: Vec<String>,
    idle_ms: Option<u64>,
}

/// Snapshot of a running `connect` session.
pub struct Status {
    pub state: ConnectionState,
    pub peer: Option<SocketAddr>,
    pub auto_send: bool,
    pub matrix: BitMatrix,
    pub idle_ms: Option<u64>,
}

pub fn print_status(status: &Status, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&StatusOutput {
            state: status.state,
            peer: status.peer.map(|p| p.to_string()),
            auto_send: status.auto_send,
            set_count: status.matrix.count_set(),
            chips: status
                .matrix
                .chip_bytes()
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect(),
            idle_ms: status.idle_ms,
        }),
        OutputFormat::Table => {
            let mut header = vec!["CHIP".to_string()];
            header.extend((0..BITS_PER_CHIP).map(|bit| bit.to_string()));
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(header);
            for (chip, row) in matrix_rows(&status.matrix).into_iter().enumerate() {
                let mut cells = vec![chip.to_string()];
                cells.extend(row.iter().map(|on| if *on { "1" } else { "." }.to_string()));
                table.add_row(cells);
            }
            println!("{} {}", status.state, peer_label(status.peer));
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "{} {} auto-send={}",
                status.state,
                peer_label(status.peer),
                if status.auto_send { "on" } else { "off" }
            );
            for (chip, row) in matrix_rows(&status.matrix).into_iter().enumerate() {
                let bits: Vec<&str> = row.iter().map(|on| if *on { "1" } else { "." }).collect();
                println!("chip {chip}: {}", bits.join(" "));
            }
        }
    }
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    peer: String,
    cmd: u8,
    data: String,
    checksum: u8,
    set: Vec<[usize; 2]>,
    raw: &'a str,
}

pub fn print_packet(packet: &Packet, peer: SocketAddr, format: OutputFormat) {
    let matrix = packet.frame().to_matrix();
    let data = hex_dump(packet.frame().bytes());
    match format {
        OutputFormat::Json => {
            let raw = hex_dump(packet.as_bytes());
            print_json(&PacketOutput {
                peer: peer.to_string(),
                cmd: packet.cmd(),
                data,
                checksum: packet.checksum(),
                set: matrix.set_addresses().map(|a| [a.chip(), a.bit()]).collect(),
                raw: &raw,
            });
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PEER", "CMD", "DATA", "SET"])
                .add_row(vec![
                    peer.to_string(),
                    format!("{:02X}", packet.cmd()),
                    data,
                    matrix.count_set().to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "peer={peer} cmd={:02X} data={data} set={}",
                packet.cmd(),
                matrix.count_set()
            );
        }
        OutputFormat::Raw => print_raw(packet.as_bytes()),
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
}

fn matrix_rows(matrix: &BitMatrix) -> [[bool; BITS_PER_CHIP]; CHIP_COUNT] {
    let mut rows = [[false; BITS_PER_CHIP]; CHIP_COUNT];
    for addr in matrix.set_addresses() {
        rows[addr.chip()][addr.bit()] = true;
    }
    rows
}

fn peer_label(peer: Option<SocketAddr>) -> String {
    peer.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
