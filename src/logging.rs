//! Process-wide logging setup.
//!
//! Mirrors the console+file `tracing` layering used throughout this codebase, plus an
//! installable callback sink so a host process can re-route log lines instead of (or in
//! addition to) the default writers.

use std::sync::{Arc, OnceLock, RwLock};

use tracing::{Event, Subscriber, debug, level_filters::LevelFilter};
use tracing_subscriber::{
    Layer, fmt,
    layer::{Context, SubscriberExt as _},
    registry::LookupSpan,
    util::SubscriberInitExt as _,
};

/// Log levels, ordered from most to least verbose. A level implicitly includes every
/// level below it, mirroring the "BOOST_LOG(info)" style the rest of the ecosystem uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    fn from_tracing(level: &tracing::Level, fatal: bool) -> Self {
        if fatal {
            return LogLevel::Fatal;
        }
        match *level {
            tracing::Level::TRACE => LogLevel::Verbose,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// Callback signature for the installable log sink: `(level, formatted message)`.
pub type LogCallback = Arc<dyn Fn(LogLevel, String) + Send + Sync>;

static CUSTOM_CALLBACK: OnceLock<RwLock<Option<LogCallback>>> = OnceLock::new();

fn callback_slot() -> &'static RwLock<Option<LogCallback>> {
    CUSTOM_CALLBACK.get_or_init(|| RwLock::new(None))
}

/// Install (or clear, with `None`) the process-wide custom log callback.
pub fn set_custom_callback(callback: Option<LogCallback>) {
    *callback_slot().write().expect("log callback lock poisoned") = callback;
}

/// A `tracing_subscriber` layer that forwards every event to the installed callback, if any.
struct CallbackLayer;

impl<S> Layer<S> for CallbackLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let guard = callback_slot().read().expect("log callback lock poisoned");
        let Some(callback) = guard.as_ref() else {
            return;
        };

        let metadata = event.metadata();
        let fatal = metadata.fields().field("fatal").is_some();
        let level = LogLevel::from_tracing(metadata.level(), fatal);

        let mut message = String::new();
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        callback(level, message);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write;
            let _ = write!(self.0, "{value:?}");
        }
    }
}

/// Initialize the process-wide subscriber: an INFO+ console writer, a DEBUG+ rolling daily
/// file writer, and the installable callback layer. Returns a guard that must be kept alive
/// for the process lifetime (dropping it stops the non-blocking file writer).
pub fn setup() -> tracing_appender::non_blocking::WorkerGuard {
    let root_directory = std::env::current_exe()
        .ok()
        .and_then(|f| f.parent().map(|p| p.to_owned()))
        .unwrap_or_else(|| ".".into());
    let log_directory = root_directory.join("logs");
    let file_appender = tracing_appender::rolling::daily(&log_directory, "display-device.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_names(false)
        .with_span_events(fmt::format::FmtSpan::NONE)
        .with_level(true)
        .with_timer(ConsoleTimeFormat)
        .with_writer(std::io::stdout)
        .with_filter(LevelFilter::INFO);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .with_span_events(fmt::format::FmtSpan::NONE)
        .with_level(true)
        .with_timer(FileTimeFormat)
        .with_writer(non_blocking_writer)
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(CallbackLayer)
        .init();

    debug!("logging initialized in {}", log_directory.display());
    guard
}

struct ConsoleTimeFormat;

impl tracing_subscriber::fmt::time::FormatTime for ConsoleTimeFormat {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let time = jiff::Zoned::now();
        write!(
            w,
            "{}:{}:{}.{}",
            time.hour(),
            time.minute(),
            time.second(),
            time.millisecond()
        )
    }
}

struct FileTimeFormat;

impl tracing_subscriber::fmt::time::FormatTime for FileTimeFormat {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let time = jiff::Zoned::now();
        write!(
            w,
            "{}-{:02}-{:02} {:02}:{:02}:{:02}.{:09}[{}]",
            time.year(),
            time.month(),
            time.day(),
            time.hour(),
            time.minute(),
            time.second(),
            time.subsec_nanosecond(),
            time.offset()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn level_from_tracing_maps_fatal_field() {
        assert_eq!(LogLevel::from_tracing(&tracing::Level::ERROR, true), LogLevel::Fatal);
        assert_eq!(LogLevel::from_tracing(&tracing::Level::ERROR, false), LogLevel::Error);
        assert_eq!(LogLevel::from_tracing(&tracing::Level::TRACE, false), LogLevel::Verbose);
    }

    #[test]
    fn custom_callback_can_be_installed_and_cleared() {
        let seen: Arc<Mutex<Vec<(LogLevel, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        set_custom_callback(Some(Arc::new(move |level, msg| {
            seen_clone.lock().unwrap().push((level, msg));
        })));
        assert!(callback_slot().read().unwrap().is_some());
        set_custom_callback(None);
        assert!(callback_slot().read().unwrap().is_none());
    }
}
