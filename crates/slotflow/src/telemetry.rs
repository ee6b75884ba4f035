//! Tracing setup and in-process log capture.
//!
//! `init_tracing` is for binaries embedding slotflow. `LogCapture` is a layer
//! that forwards every event to a channel, for callers that want to inspect
//! gate activity (queue saturation, leaked work on drop) programmatically.

use std::fmt;

use tokio::sync::mpsc;
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

/// Install a global subscriber writing to stderr.
///
/// `RUST_LOG` wins if set; otherwise `SLOTFLOW_LOG` picks the level for the
/// `slotflow` target (default `info`). `LOG_FORMAT=json` switches to JSON
/// lines. Does nothing if a global subscriber is already installed.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(crate_directive(
            std::env::var("SLOTFLOW_LOG").ok().as_deref(),
        ))
    };

    let output = tracing_fmt::layer().with_writer(std::io::stderr);
    let output = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        output.json().boxed()
    } else {
        output.boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init();
}

/// Filter directive for the `slotflow` target. Unknown levels mean `info`.
fn crate_directive(level: Option<&str>) -> String {
    let level = match level.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        Some(level @ ("trace" | "debug" | "warn" | "error")) => level.to_string(),
        Some("warning") => "warn".to_string(),
        _ => "info".to_string(),
    };
    format!("slotflow={level}")
}

/// One event seen by [`LogCapture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    pub level: tracing::Level,
    pub target: String,
    pub message: String,
    /// Structured fields other than `message`, in recording order.
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for CapturedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.level, self.target, self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Layer forwarding events to an unbounded channel.
pub struct LogCapture {
    tx: mpsc::UnboundedSender<CapturedEvent>,
}

impl LogCapture {
    pub fn new(tx: mpsc::UnboundedSender<CapturedEvent>) -> Self {
        Self { tx }
    }
}

impl<S> Layer<S> for LogCapture
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if self.tx.is_closed() {
            return;
        }

        let metadata = event.metadata();
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let _ = self.tx.send(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.push((field.name().to_string(), rendered));
        }
    }
}

/// Collect everything captured so far without waiting.
pub fn drain_captured(rx: &mut mpsc::UnboundedReceiver<CapturedEvent>) -> Vec<CapturedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
