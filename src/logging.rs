//! Logging context.
//!
//! A [`LogContext`] is built once from the `logger` section of the compass
//! and passed to the components that care about logging policy (debug-mode
//! volume retention, error rendering). The events themselves are emitted
//! through `tracing` and collected by the subscriber installed here.

use crate::compass::{LogTarget, LoggerCompass};
use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Process-wide logging policy.
#[derive(Debug, Clone)]
pub struct LogContext {
    level: String,
    pretty: bool,
    debug_mode: bool,
    target: LogTarget,
    config: LoggerCompass,
}

impl LogContext {
    /// Creates the context from the `logger` section.
    pub fn new(config: &LoggerCompass) -> Self {
        let debug_mode = config.debug;
        let level = if debug_mode {
            "DEBUG".to_string()
        } else {
            config.level.trim().to_uppercase()
        };

        Self {
            level,
            pretty: config.pretty,
            debug_mode,
            target: config.target,
            config: config.clone(),
        }
    }

    /// A context with default settings, for tests and embedding.
    pub fn quiet() -> Self {
        Self::new(&LoggerCompass::default())
    }

    /// Returns true when log volumes must be kept and raw errors shown.
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Effective level name.
    pub fn level(&self) -> &str {
        &self.level
    }

    /// Installs the global `tracing` subscriber.
    ///
    /// # Errors
    ///
    /// Fails if the level is unknown, the log file cannot be opened, or a
    /// subscriber is already installed.
    pub fn install(&self) -> Result<()> {
        let filter = EnvFilter::try_new(self.level.to_lowercase())
            .map_err(|e| Error::Configuration(format!("invalid log level '{}': {e}", self.level)))?;

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false);

        let installed = match (self.target, self.pretty) {
            (LogTarget::Stderr, true) => builder.with_writer(std::io::stderr).try_init(),
            (LogTarget::Stderr, false) => builder.json().with_writer(std::io::stderr).try_init(),
            (LogTarget::Stdout, true) => builder.with_writer(std::io::stdout).try_init(),
            (LogTarget::Stdout, false) => builder.json().with_writer(std::io::stdout).try_init(),
            (LogTarget::File, pretty) => {
                let path = self.config.file_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                let writer = Mutex::new(file);

                if pretty {
                    builder.with_ansi(false).with_writer(writer).try_init()
                } else {
                    builder.json().with_writer(writer).try_init()
                }
            }
        };

        installed.map_err(|e| Error::Configuration(format!("logger already installed: {e}")))
    }

    /// Renders an error for the operator.
    ///
    /// The structured form is always shown; the raw debug form only in
    /// debug mode.
    pub fn render_error(&self, err: &Error) -> String {
        let pretty = err.pretty().to_string();

        if self.debug_mode {
            format!("{pretty}\n{err:#?}")
        } else {
            pretty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_forces_debug_level() {
        let config = LoggerCompass {
            level: "warn".to_string(),
            debug: true,
            ..LoggerCompass::default()
        };
        let ctx = LogContext::new(&config);

        assert!(ctx.debug_mode());
        assert_eq!(ctx.level(), "DEBUG");
    }

    #[test]
    fn test_render_error_hides_debug_form() {
        let ctx = LogContext::quiet();
        let rendered = ctx.render_error(&Error::Misusage("scaling a singleton".into()));

        assert!(rendered.contains("MisusageError"));
        assert!(!rendered.contains("Misusage("));
    }
}
