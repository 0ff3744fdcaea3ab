use std::sync::Arc;

use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Initialize structured logging based on configuration
///
/// Supports both JSON (production) and pretty (development) formats
/// with configurable log levels and optional file output. `RUST_LOG`
/// overrides the configured level when set.
///
/// Events raised during a resolution carry the `resolve` span's `holder`
/// and `contexts` fields. With `resolution_spans` on, every resolution also
/// logs its node counts and duration when it finishes.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);
    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            std::fs::OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    if config.format.as_str() == "json" {
        match file {
            Some(file) => registry.with(json_layer(config, file)).try_init()?,
            None => registry.with(json_layer(config, std::io::stdout)).try_init()?,
        }
    } else {
        match file {
            Some(file) => registry.with(pretty_layer(config, file)).try_init()?,
            None => registry.with(pretty_layer(config, std::io::stdout)).try_init()?,
        }
    }

    tracing::debug!(
        level = %log_level,
        format = %config.format,
        resolution_spans = config.resolution_spans,
        "Logging initialized"
    );
    Ok(())
}

fn span_events(config: &LoggingConfig) -> FmtSpan {
    if config.resolution_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// JSON lines; each event carries its innermost span (the `resolve` span
/// during resolution) as a nested object
fn json_layer<S, W>(config: &LoggingConfig, writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_span_events(span_events(config))
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_line_number(true)
        .with_writer(writer)
}

fn pretty_layer<S, W>(config: &LoggingConfig, writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .pretty()
        .with_span_events(span_events(config))
        .with_target(true)
        .with_line_number(true)
        .with_file(false)
        .with_writer(writer)
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Contexts;
    use crate::test_helpers::{node, resolver, user_holder};

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'w> MakeWriter<'w> for Captured {
        type Writer = Self;

        fn make_writer(&'w self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_resolution(config: &LoggingConfig) -> (String, String) {
        let out = Captured::default();
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("debug"))
            .with(json_layer(config, out.clone()));

        let (_groups, resolver) = resolver();
        let holder = user_holder(&[node("fly", true), node("group.ghost", true)]);
        tracing::subscriber::with_default(subscriber, || {
            resolver.export_nodes(&holder, &Contexts::allow_all());
        });
        (out.text(), holder.id().to_string())
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("TRACE").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("error").is_ok());
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn test_resolution_events_carry_holder() {
        let (text, holder) = capture_resolution(&LoggingConfig::default());

        let missing = text
            .lines()
            .find(|line| line.contains("Inherited group is not loaded"))
            .expect("missing group warning");
        assert!(missing.contains("\"resolve\""));
        assert!(missing.contains(&holder));
        assert!(!text.contains("\"close\""));
    }

    #[test]
    fn test_resolution_spans_log_on_close() {
        let config = LoggingConfig {
            resolution_spans: true,
            ..LoggingConfig::default()
        };
        let (text, holder) = capture_resolution(&config);

        let closed = text
            .lines()
            .find(|line| line.contains("\"close\""))
            .expect("span close event");
        assert!(closed.contains("\"resolve\""));
        assert!(closed.contains(&holder));
        assert!(closed.contains("time.busy"));
    }
}
