//! In-memory log capture for the `show log` command, plus runtime log-level
//!  switching for `set log level`.
//!
//! Implemented as a `tracing-subscriber` layer that keeps the most recent
//!  events formatted in a bounded ring buffer, stacked next to the regular
//!  fmt layer behind a reloadable level filter.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

/// events retained for `show log`; older ones fall off the front
const LOG_CAPACITY: usize = 1024;

#[derive(Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LogBuffer {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() == LOG_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn dump(&self) -> String {
        let lines = self.lines.lock().unwrap();
        let mut out = String::new();
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().unwrap().is_empty()
    }
}

pub struct BufferLayer {
    buffer: LogBuffer,
}

impl BufferLayer {
    pub fn new(buffer: LogBuffer) -> BufferLayer {
        BufferLayer { buffer }
    }
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut line = format!("{:>5} {}", metadata.level(), metadata.target());

        let mut visitor = LineVisitor { line: &mut line };
        event.record(&mut visitor);

        self.buffer.push(line);
    }
}

struct LineVisitor<'a> {
    line: &'a mut String,
}

impl Visit for LineVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.line, " {:?}", value);
        } else {
            let _ = write!(self.line, " {}={:?}", field.name(), value);
        }
    }
}

/// `trace|debug|info|warn|error|critical`; `critical` maps to ERROR, the
///  most severe level tracing knows
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" => Some(LevelFilter::WARN),
        "error" | "critical" => Some(LevelFilter::ERROR),
        _ => None,
    }
}

/// handle onto the driver's logging stack: the ring buffer and the level
pub struct LogHandle {
    pub buffer: LogBuffer,
    reload: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    pub fn set_level(&self, level: LevelFilter) -> anyhow::Result<()> {
        self.reload.reload(level)?;
        Ok(())
    }
}

/// Installs the global subscriber for the driver binary: reloadable level
///  filter, ring buffer, fmt output to stderr (stdout belongs to delivered
///  messages).
pub fn init() -> LogHandle {
    let (filter, reload) = reload::Layer::new(LevelFilter::INFO);
    let buffer = LogBuffer::default();

    tracing_subscriber::registry()
        .with(filter)
        .with(BufferLayer::new(buffer.clone()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    LogHandle { buffer, reload }
}
