use lora_as_error::{ASError, ASResult};
use std::{
    str::FromStr,
    sync::{Arc, RwLock},
};
use tracing::{subscriber::set_global_default, Level, Metadata};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::{filter_fn, FilterFn},
    fmt::{self},
    layer::SubscriberExt,
    Layer, Registry,
};

const LOG_FILE_NAME: &str = "lora-app-server.log";

/// Console plus daily rolling file output sharing one runtime adjustable
/// level.
pub struct Logger {
    level: Arc<RwLock<Level>>,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn new(level: Level) -> Self {
        Logger {
            level: Arc::new(RwLock::new(level)),
            _file_guard: None,
        }
    }

    /// Parses a configured level name (`trace`..`error`, case insensitive).
    pub fn parse_level(level: &str) -> ASResult<Level> {
        Level::from_str(level.trim())
            .map_err(|_| ASError::Validation(format!("invalid log level `{level}`")))
    }

    #[inline]
    pub fn set_level(&self, new_level: Level) {
        let mut level = self.level.write().unwrap_or_else(|e| e.into_inner());
        *level = new_level;
    }

    #[inline]
    pub fn get_level(&self) -> Level {
        *self.level.read().unwrap_or_else(|e| e.into_inner())
    }

    fn level_filter(&self) -> FilterFn<impl Fn(&Metadata<'_>) -> bool + Send + Sync + 'static> {
        let level = Arc::clone(&self.level);
        filter_fn(move |metadata| {
            metadata.level() <= &*level.read().unwrap_or_else(|e| e.into_inner())
        })
    }

    /// Installs the global subscriber. Log files go to `log_dir`.
    pub fn initialize(&mut self, log_dir: &str) -> ASResult<()> {
        let file_appender = rolling::daily(log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stdout)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer().with_writer(std::io::stdout).with_target(false);

            layer.with_filter(self.level_filter())
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(self.level_filter());

        let subscriber = Registry::default().with(console_layer).with(file_layer);
        set_global_default(subscriber).map_err(|_| ASError::from("Failed to set logger"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_parsed() {
        assert_eq!(Logger::parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(Logger::parse_level(" warn ").unwrap(), Level::WARN);
        assert!(matches!(
            Logger::parse_level("loud"),
            Err(ASError::Validation(_))
        ));
    }

    #[test]
    fn level_can_change_at_runtime() {
        let logger = Logger::new(Level::INFO);
        logger.set_level(Level::TRACE);
        assert_eq!(logger.get_level(), Level::TRACE);
    }
}
