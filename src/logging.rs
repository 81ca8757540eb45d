// src/logging.rs

//! Logging setup for `buildorch` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `BUILDORCH_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Logs go to STDERR. Every warning and error is also kept by
//! [`SummaryLayer`] so it can be repeated at the end of a verbose run.

use std::fmt::Write as _;
use std::sync::{LazyLock, Mutex};

use anyhow::Result;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::LogLevel;

static SUMMARY: LazyLock<Mutex<Vec<String>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = match cli_level {
        Some(lvl) => level_from_log_level(lvl),
        None => std::env::var("BUILDORCH_LOG")
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(Level::INFO),
    };

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr),
        )
        .with(SummaryLayer)
        .try_init()?;

    Ok(())
}

/// Records WARN and ERROR events, prefixed with the innermost task name.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryLayer;

/// `name` field of a span, kept so events can be attributed to a task.
struct TaskName(String);

impl<S> Layer<S> for SummaryLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = NameVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(name), Some(span)) = (visitor.name, ctx.span(id)) {
            span.extensions_mut().insert(TaskName(name));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let task = ctx.event_scope(event).and_then(|scope| {
            scope
                .filter_map(|span| span.extensions().get::<TaskName>().map(|n| n.0.clone()))
                .next()
        });

        let mut line = format!("{level:>5}");
        if let Some(task) = task {
            let _ = write!(line, " [{task}]");
        }
        let _ = write!(line, " {}", visitor.finish());

        SUMMARY.lock().unwrap_or_else(|e| e.into_inner()).push(line);
    }
}

#[derive(Default)]
struct NameVisitor {
    name: Option<String>,
}

impl Visit for NameVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "name" {
            self.name = Some(format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "name" {
            self.name = Some(value.to_string());
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}

/// Warnings and errors recorded so far.
pub fn summary() -> Vec<String> {
    SUMMARY.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Print the accumulated warnings and errors when running at DEBUG or finer.
pub fn print_summary() {
    if LevelFilter::current() < LevelFilter::DEBUG {
        return;
    }
    let entries = summary();
    if entries.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("{} warning(s)/error(s) during the run:", entries.len());
    for entry in entries {
        eprintln!("  {entry}");
    }
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
