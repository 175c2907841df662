//! Logging setup for the webhook relay.
//!
//! Every crate in the workspace logs through `tracing` macros. This crate
//! decides where those events go: it reads the `RELAY_*` environment
//! variables and installs a `tracing-subscriber` registry once per process.
//!
//! # Usage
//!
//! ```rust
//! let config = relay_log::LogConfig::from_env();
//! relay_log::init(&config);
//!
//! tracing::info!(endpoint = "abc", "relay started");
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_DEBUG=1` - Force debug logging
//! - `RELAY_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `RELAY_LOG_FORMAT=pretty|compact|json` - Set output format
//! - `RELAY_LOG_COLOR=1|0` - Enable/disable colors
//! - `RELAY_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `RUST_LOG` - Full filter directive, overrides the level when set

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// A `RELAY_LOG_*` value that names no known level or format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue(pub String);

impl std::fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown log setting `{}`", self.0)
    }
}

impl std::error::Error for UnknownValue {}

// ============================================================================
// Levels and formats
// ============================================================================

/// Minimum severity that reaches the output, most verbose first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Nothing is written
    Off,
}

impl Level {
    /// Lowercase name, also the `EnvFilter` directive.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::str::FromStr for Level {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            "off" | "none" => Level::Off,
            _ => return Err(UnknownValue(s.to_string())),
        };
        Ok(level)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_directive().to_ascii_uppercase())
    }
}

/// How events are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line, for a terminal
    Pretty,
    Compact,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for Format {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Format::Pretty),
            "compact" => Ok(Format::Compact),
            "json" => Ok(Format::Json),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include the event target (module path)
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            timestamps: true,
            target: true,
        }
    }
}

impl LogConfig {
    /// Create config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    ///
    /// `std::env::set_var` is unsafe under a multi-threaded test harness,
    /// so tests drive this with a closure over a map instead.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let debug = flag("RELAY_DEBUG").unwrap_or(false);

        let level = lookup("RELAY_LOG_LEVEL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("RELAY_LOG_FORMAT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(Format::Json);

        // JSON output never carries escape codes
        let color = flag("RELAY_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some())
            && format != Format::Json;

        let timestamps = flag("RELAY_LOG_TIMESTAMPS").unwrap_or(true);

        Self {
            debug,
            level,
            format,
            color,
            timestamps,
            target: true,
        }
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        if format == Format::Json {
            self.color = false;
        }
        self
    }

    /// Enable or disable debug mode.
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        if enabled && self.level > Level::Debug {
            self.level = Level::Debug;
        }
        self
    }

    /// The level that is actually applied after the debug flag is considered.
    pub fn effective_level(&self) -> Level {
        if self.debug && self.level > Level::Debug {
            Level::Debug
        } else {
            self.level
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.effective_level().as_directive()))
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(self.target)
            .with_ansi(self.color);

        match (self.format, self.timestamps) {
            (Format::Json, true) => base.json().boxed(),
            (Format::Json, false) => base.json().without_time().boxed(),
            (Format::Compact, true) => base.compact().boxed(),
            (Format::Compact, false) => base.compact().without_time().boxed(),
            (Format::Pretty, true) => base.pretty().boxed(),
            (Format::Pretty, false) => base.pretty().without_time().boxed(),
        }
    }
}

// ============================================================================
// Installation
// ============================================================================

static INSTALLED: OnceCell<LogConfig> = OnceCell::new();

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed, either by an
/// earlier call or by someone else in the process.
pub fn init(config: &LogConfig) -> bool {
    let mut installed = false;
    INSTALLED.get_or_init(|| {
        installed = tracing_subscriber::registry()
            .with(config.fmt_layer())
            .with(config.filter())
            .try_init()
            .is_ok();
        config.clone()
    });
    installed
}

/// Install the global subscriber using [`LogConfig::from_env`].
pub fn init_from_env() -> bool {
    init(&LogConfig::from_env())
}

/// The configuration the global subscriber was installed with, if any.
pub fn installed_config() -> Option<&'static LogConfig> {
    INSTALLED.get()
}
