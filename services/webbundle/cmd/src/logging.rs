use chrono::SecondsFormat;
use std::fmt;
use std::fmt::Write as _;
use std::io::IsTerminal;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const RESET: &str = "\x1b[0m";
const TIMESTAMP_COLOR: &str = "\x1b[36m";

/// Width of the component column
const COMPONENT_WIDTH: usize = 20;
/// Width of the level column
const LEVEL_WIDTH: usize = 5;

/// Formats events as `[timestamp] [component] [LEVEL] message key=value ...`
pub struct BundleLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl BundleLogFormatter {
    pub fn new(service_name: String) -> Self {
        let color_enabled = color_wanted(
            std::env::var_os("NO_COLOR").is_some(),
            std::env::var("TERM").ok().as_deref(),
            std::io::stderr().is_terminal(),
        );
        Self {
            service_name,
            color_enabled,
        }
    }

    /// Component column: the library crate that emitted the event, e.g.
    /// `webbundle-signing` for `webbundle_signing::verifier`.
    fn format_component(&self, target: &str) -> String {
        let crate_name = target.split("::").next().unwrap_or(target);
        let name = match crate_name.strip_prefix("webbundle_") {
            Some(component) => format!("{}-{}", self.service_name, component),
            None => self.service_name.clone(),
        };

        if name.chars().count() > COMPONENT_WIDTH {
            let truncated: String = name.chars().take(COMPONENT_WIDTH - 1).collect();
            format!("{truncated}…")
        } else {
            format!("{:<width$}", name, width = COMPONENT_WIDTH)
        }
    }

    /// Level column, colored when enabled
    fn format_level(&self, level: &Level) -> String {
        let (label, color) = level_style(level);
        if self.color_enabled {
            format!("{color}{label:<LEVEL_WIDTH$}{RESET}")
        } else {
            format!("{label:<LEVEL_WIDTH$}")
        }
    }

    fn format_timestamp(&self) -> String {
        let now = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if self.color_enabled {
            format!("{TIMESTAMP_COLOR}{now}{RESET}")
        } else {
            now
        }
    }
}

/// Label and ANSI color for a level
fn level_style(level: &Level) -> (&'static str, &'static str) {
    match *level {
        Level::ERROR => ("ERROR", "\x1b[91m"),
        Level::WARN => ("WARN", "\x1b[93m"),
        Level::INFO => ("INFO", "\x1b[32m"),
        Level::DEBUG => ("DEBUG", "\x1b[90m"),
        Level::TRACE => ("TRACE", "\x1b[90m"),
    }
}

/// Color only when stderr, where logs go, is a capable terminal and
/// `NO_COLOR` is unset
fn color_wanted(no_color: bool, term: Option<&str>, stderr_is_terminal: bool) -> bool {
    !no_color && term != Some("dumb") && stderr_is_terminal
}

impl<S, N> FormatEvent<S, N> for BundleLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        writeln!(
            writer,
            "[{}] [{}] [{}] {}{}",
            self.format_timestamp(),
            self.format_component(metadata.target()),
            self.format_level(metadata.level()),
            visitor.message,
            visitor.fields
        )
    }
}

/// Collects the message and renders the remaining fields as `key=value`
#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: String,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}
