//! Envelope renderers for the terminal.
//!
//! Three strategies behind one trait: `rich` (color and clock times),
//! `minimal` (bare lines), and `json` (one machine-readable object per
//! line). Heartbeat traffic renders to nothing.

use chrono::{Local, TimeZone};
use clap::ValueEnum;
use cmdchat_wire::Envelope;
use serde::Serialize;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";

/// Renderer selection on the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RendererKind {
    /// Colors, clock timestamps, sequence tags
    Rich,
    /// Bare `sender: text` lines
    Minimal,
    /// One JSON object per envelope
    Json,
}

/// Strategy interface: turn an envelope into a printable line.
pub trait Renderer: Send {
    /// Render one envelope, or `None` when it produces no output.
    fn render(&self, envelope: &Envelope) -> Option<String>;
}

/// Build the renderer for a CLI selection.
pub fn create(kind: RendererKind) -> Box<dyn Renderer> {
    match kind {
        RendererKind::Rich => Box::new(RichRenderer),
        RendererKind::Minimal => Box::new(MinimalRenderer),
        RendererKind::Json => Box::new(JsonRenderer),
    }
}

fn clock(ts: Option<i64>) -> String {
    ts.and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

struct RichRenderer;

impl Renderer for RichRenderer {
    fn render(&self, envelope: &Envelope) -> Option<String> {
        match envelope {
            Envelope::Chat {
                sender,
                text,
                ts,
                seq,
                ..
            } => {
                let sender = sender.as_deref().unwrap_or("?");
                let seq_tag = seq.map(|s| format!(" #{s}")).unwrap_or_default();
                Some(format!(
                    "{COLOR_CYAN}[{}{}]{COLOR_RESET} {COLOR_GREEN}{sender}{COLOR_RESET}: {text}",
                    clock(*ts),
                    seq_tag
                ))
            }
            Envelope::System { text, ts, .. } => Some(format!(
                "{COLOR_CYAN}[{}]{COLOR_RESET} {COLOR_BRIGHT_YELLOW}[system]{COLOR_RESET} {text}",
                clock(*ts)
            )),
            Envelope::Error { code, detail } => Some(format!(
                "{COLOR_BRIGHT_RED}[error]{COLOR_RESET} {}: {}",
                code.as_str(),
                detail.as_deref().unwrap_or("")
            )),
            Envelope::FileStart {
                sender,
                filename,
                size,
                total_chunks,
                ..
            } => Some(format!(
                "{COLOR_BRIGHT_YELLOW}[file]{COLOR_RESET} {} is sending {filename} ({size} bytes, {total_chunks} chunks)",
                sender.as_deref().unwrap_or("?")
            )),
            Envelope::FileEnd {
                sender, filename, ..
            } => Some(format!(
                "{COLOR_BRIGHT_YELLOW}[file]{COLOR_RESET} {} finished sending {filename}",
                sender.as_deref().unwrap_or("?")
            )),
            _ => None,
        }
    }
}

struct MinimalRenderer;

impl Renderer for MinimalRenderer {
    fn render(&self, envelope: &Envelope) -> Option<String> {
        match envelope {
            Envelope::Chat { sender, text, .. } => {
                Some(format!("{}: {text}", sender.as_deref().unwrap_or("?")))
            }
            Envelope::System { text, .. } => Some(format!("[system] {text}")),
            Envelope::Error { code, detail } => Some(format!(
                "[error] {}: {}",
                code.as_str(),
                detail.as_deref().unwrap_or("")
            )),
            Envelope::FileStart {
                sender, filename, ..
            } => Some(format!(
                "[file] {} is sending {filename}",
                sender.as_deref().unwrap_or("?")
            )),
            Envelope::FileEnd { filename, .. } => Some(format!("[file] {filename} received")),
            _ => None,
        }
    }
}

/// Flat record shape for the machine-readable renderer
#[derive(Serialize)]
struct LineRecord<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

impl<'a> LineRecord<'a> {
    fn new(kind: &'a str) -> Self {
        Self {
            kind,
            sender: None,
            room: None,
            text: None,
            ts: None,
            seq: None,
            filename: None,
            size: None,
            code: None,
        }
    }
}

struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, envelope: &Envelope) -> Option<String> {
        let record = match envelope {
            Envelope::Chat {
                sender,
                room,
                text,
                ts,
                seq,
            } => {
                let mut r = LineRecord::new("chat");
                r.sender = sender.as_deref();
                r.room = room.as_deref();
                r.text = Some(text.as_str());
                r.ts = *ts;
                r.seq = *seq;
                r
            }
            Envelope::System { text, room, ts } => {
                let mut r = LineRecord::new("system");
                r.room = room.as_deref();
                r.text = Some(text.as_str());
                r.ts = *ts;
                r
            }
            Envelope::Error { code, detail } => {
                let mut r = LineRecord::new("error");
                r.code = Some(code.as_str());
                r.text = detail.as_deref();
                r
            }
            Envelope::FileStart {
                sender,
                filename,
                size,
                ..
            } => {
                let mut r = LineRecord::new("file-start");
                r.sender = sender.as_deref();
                r.filename = Some(filename.as_str());
                r.size = Some(*size);
                r
            }
            Envelope::FileEnd {
                sender, filename, ..
            } => {
                let mut r = LineRecord::new("file-end");
                r.sender = sender.as_deref();
                r.filename = Some(filename.as_str());
                r
            }
            _ => return None,
        };
        serde_json::to_string(&record).ok()
    }
}
