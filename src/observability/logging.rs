//! Line-oriented logging sink.
//!
//! # Responsibilities
//! - Define the eight syslog-style severities and their names
//! - Render each `tracing` event as one `<source> - [<time>] - <LEVEL> - "<msg>"` line
//! - Filter by a configured severity threshold
//! - Install the subscriber once at startup
//!
//! # Design Decisions
//! - Built as a `tracing_subscriber::Layer`, so the rest of the crate logs
//!   through the ordinary `tracing` macros
//! - Events may carry `severity` (numeric) and `source` fields; without
//!   them the severity follows the tracing level and the source is `INTERNAL`
//! - Lower number = more severe; an event is written iff `severity <= threshold`

use std::fmt::{self, Write as _};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::subscriber::Interest;
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Source tag used when an event names none.
pub const DEFAULT_SOURCE: &str = "INTERNAL";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Syslog-style severity. `Emerg` is the most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(try_from = "SeverityRepr", into = "String")]
pub enum Severity {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Error = 3,
    Warn = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 8] = [
        Severity::Emerg,
        Severity::Alert,
        Severity::Crit,
        Severity::Error,
        Severity::Warn,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Emerg => "EMERG",
            Severity::Alert => "ALERT",
            Severity::Crit => "CRIT",
            Severity::Error => "ERROR",
            Severity::Warn => "WARN",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Parse `0`-`7` or a level name (`EMERG` ... `DEBUG`).
    pub fn parse(s: &str) -> Result<Self, InvalidSeverity> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code).ok_or_else(|| InvalidSeverity(s.to_string()));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| InvalidSeverity(s.to_string()))
    }

    /// Severity for an event that does not name one.
    pub fn from_tracing(level: &Level) -> Self {
        match *level {
            Level::ERROR => Severity::Error,
            Level::WARN => Severity::Warn,
            Level::INFO => Severity::Info,
            _ => Severity::Debug,
        }
    }

    /// The tracing level events of this severity are emitted at.
    pub fn tracing_level(&self) -> Level {
        match self {
            Severity::Emerg | Severity::Alert | Severity::Crit | Severity::Error => Level::ERROR,
            Severity::Warn => Level::WARN,
            Severity::Notice | Severity::Info => Level::INFO,
            Severity::Debug => Level::DEBUG,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = InvalidSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::parse(s)
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.as_str().to_string()
    }
}

/// Configuration files may spell a level as a number or a name.
#[derive(Deserialize)]
#[serde(untagged)]
enum SeverityRepr {
    Number(u8),
    Name(String),
}

impl TryFrom<SeverityRepr> for Severity {
    type Error = InvalidSeverity;

    fn try_from(repr: SeverityRepr) -> Result<Self, InvalidSeverity> {
        match repr {
            SeverityRepr::Number(code) => {
                Severity::from_code(code).ok_or_else(|| InvalidSeverity(code.to_string()))
            }
            SeverityRepr::Name(name) => Severity::parse(&name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid log level {0:?}: expected 0-7 or EMERG|ALERT|CRIT|ERROR|WARN|NOTICE|INFO|DEBUG")]
pub struct InvalidSeverity(pub String);

/// Emit one log line at `severity`, tagged with `source`.
pub fn log(severity: Severity, source: &str, message: &str) {
    let code = severity.code();
    match severity.tracing_level() {
        Level::ERROR => tracing::error!(severity = code, source, "{}", message),
        Level::WARN => tracing::warn!(severity = code, source, "{}", message),
        Level::INFO => tracing::info!(severity = code, source, "{}", message),
        _ => tracing::debug!(severity = code, source, "{}", message),
    }
}

/// Render one line in the sink's format.
pub fn format_line(source: &str, timestamp: &str, severity: Severity, message: &str) -> String {
    format!("{} - [{}] - {} - \"{}\"\n", source, timestamp, severity, message)
}

/// `tracing` layer writing syslog-style lines.
pub struct SyslogLayer {
    threshold: Severity,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl SyslogLayer {
    pub fn new(threshold: Severity, writer: Box<dyn Write + Send>) -> Self {
        Self {
            threshold,
            writer: Mutex::new(writer),
        }
    }

    pub fn stderr(threshold: Severity) -> Self {
        Self::new(threshold, Box::new(io::stderr()))
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    /// Most severe severity an event at `level` can carry.
    fn most_severe_for(level: &Level) -> Severity {
        match *level {
            Level::ERROR => Severity::Emerg,
            Level::WARN => Severity::Warn,
            Level::INFO => Severity::Notice,
            _ => Severity::Debug,
        }
    }
}

impl<S> Layer<S> for SyslogLayer
where
    S: Subscriber,
{
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        !metadata.is_event() || Self::most_severe_for(metadata.level()) <= self.threshold
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let severity = visitor
            .severity
            .unwrap_or_else(|| Severity::from_tracing(event.metadata().level()));
        if severity > self.threshold {
            return;
        }

        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let source = visitor.source.as_deref().unwrap_or(DEFAULT_SOURCE);
        let line = format_line(source, &timestamp, severity, &visitor.message());

        if let Ok(mut writer) = self.writer.lock() {
            // nowhere left to report a failing log sink
            let _ = writer.write_all(line.as_bytes());
            let _ = writer.flush();
        }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
    severity: Option<Severity>,
    source: Option<String>,
}

impl LineVisitor {
    fn message(&self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message.clone(),
            (true, false) => self.fields.clone(),
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for LineVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "severity" => {
                self.severity = u8::try_from(value).ok().and_then(Severity::from_code);
            }
            name => self.push_field(name, format_args!("{}", value)),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        match field.name() {
            "severity" => {
                self.severity = u8::try_from(value).ok().and_then(Severity::from_code);
            }
            name => self.push_field(name, format_args!("{}", value)),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "source" => self.source = Some(value.to_string()),
            "severity" => self.severity = Severity::parse(value).ok(),
            name => self.push_field(name, format_args!("{}", value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "source" => self.source = Some(format!("{:?}", value)),
            name => self.push_field(name, format_args!("{:?}", value)),
        }
    }
}

/// Failure to install the logging sink.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("cannot open log output {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("a global logger is already installed")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the sink described by `config` as the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), InitError> {
    let layer = match &config.output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Open {
                    path: path.clone(),
                    source,
                })?;
            SyslogLayer::new(config.level, Box::new(file))
        }
        None => SyslogLayer::stderr(config.level),
    };

    tracing_subscriber::registry().with(layer).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(threshold: Severity, f: impl FnOnce()) -> Vec<String> {
        let buf = SharedBuf::default();
        let layer = SyslogLayer::new(threshold, Box::new(buf.clone()));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        buf.lines()
    }

    /// Split `src - [ts] - LEVEL - "msg"` into (src, LEVEL, msg).
    fn fields(line: &str) -> (String, String, String) {
        let (source, rest) = line.split_once(" - [").unwrap();
        let (_, rest) = rest.split_once("] - ").unwrap();
        let (level, message) = rest.split_once(" - ").unwrap();
        let message = message.strip_prefix('"').unwrap().strip_suffix('"').unwrap();
        (source.to_string(), level.to_string(), message.to_string())
    }

    #[test]
    fn parses_numbers_and_names() {
        assert_eq!(Severity::parse("0"), Ok(Severity::Emerg));
        assert_eq!(Severity::parse("7"), Ok(Severity::Debug));
        assert_eq!(Severity::parse("NOTICE"), Ok(Severity::Notice));
        assert_eq!(Severity::parse("warn"), Ok(Severity::Warn));
        assert!(Severity::parse("8").is_err());
        assert!(Severity::parse("LOUD").is_err());
        assert!(Severity::parse("").is_err());
    }

    #[test]
    fn codes_are_ordered_by_severity() {
        for (code, severity) in Severity::ALL.iter().enumerate() {
            assert_eq!(usize::from(severity.code()), code);
        }
        assert!(Severity::Emerg < Severity::Debug);
    }

    #[test]
    fn explicit_severity_and_source() {
        let lines = capture(Severity::Warn, || {
            log(Severity::Crit, "ipv4", "bind failed");
        });

        assert_eq!(lines.len(), 1);
        let (source, level, message) = fields(&lines[0]);
        assert_eq!(source, "ipv4");
        assert_eq!(level, "CRIT");
        assert_eq!(message, "bind failed");
    }

    #[test]
    fn threshold_filters_less_severe_events() {
        let lines = capture(Severity::Warn, || {
            log(Severity::Notice, "ipv6", "hidden");
            log(Severity::Warn, "ipv6", "shown");
            tracing::info!("hidden too");
            tracing::error!("plain error");
        });

        assert_eq!(lines.len(), 2);
        assert_eq!(fields(&lines[0]).2, "shown");
        let (source, level, message) = fields(&lines[1]);
        assert_eq!(source, DEFAULT_SOURCE);
        assert_eq!(level, "ERROR");
        assert_eq!(message, "plain error");
    }

    #[test]
    fn extra_fields_follow_message() {
        let lines = capture(Severity::Debug, || {
            tracing::debug!(peer = "127.0.0.1:1", status = 200u64, "response written");
        });

        let (_, level, message) = fields(&lines[0]);
        assert_eq!(level, "DEBUG");
        assert_eq!(message, "response written peer=127.0.0.1:1 status=200");
    }

    #[test]
    fn line_format() {
        let line = format_line("INTERNAL", "2024-01-02 03:04:05 +0000", Severity::Warn, "hi");
        assert_eq!(line, "INTERNAL - [2024-01-02 03:04:05 +0000] - WARN - \"hi\"\n");
    }
}
