//! Logging setup
//!
//! The service log goes to a rolling file (plus stdout in text mode) under
//! the configured level, which `RUST_LOG` overrides. Audit records also go
//! to their own JSON file when `audit_log_file` is set, whatever the level.

use crate::audit::AUDIT_TARGET;
use crate::config::AppConfig;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Keeps the background writers flushing; drop on exit
pub struct LogGuards {
    _service: WorkerGuard,
    _audit: Option<WorkerGuard>,
}

/// Service filter when `RUST_LOG` is unset. HTTP and SQL client chatter is
/// capped at warn.
pub fn default_directives(level: &str) -> String {
    format!("{},hyper=warn,reqwest=warn,h2=warn,rustls=warn,sqlx=warn", level)
}

fn service_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Audit records at info and above, nothing else
pub fn audit_targets() -> Targets {
    Targets::new().with_target(AUDIT_TARGET, Level::INFO)
}

/// One flat JSON object per audit record
fn audit_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(audit_targets())
}

fn rolling(rotation: &str, dir: &str, file: &str) -> RollingFileAppender {
    match rotation {
        "hourly" => tracing_appender::rolling::hourly(dir, file),
        "daily" => tracing_appender::rolling::daily(dir, file),
        _ => tracing_appender::rolling::never(dir, file),
    }
}

pub fn init_logging(config: &AppConfig) -> LogGuards {
    let (service_writer, service_guard) = tracing_appender::non_blocking(rolling(
        &config.rotation,
        &config.log_dir,
        &config.log_file,
    ));

    // JSON keeps the target so a pipeline can still route audit records
    let service_layer = if config.use_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(service_writer)
            .with_ansi(false)
            .with_filter(service_filter(&config.log_level))
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(service_writer)
            .with_ansi(false)
            .with_filter(service_filter(&config.log_level))
            .boxed()
    };
    let stdout_layer = (!config.use_json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_ansi(true)
            .with_filter(service_filter(&config.log_level))
    });

    let (audit, audit_guard) = match &config.audit_log_file {
        Some(file) => {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling(&config.rotation, &config.log_dir, file));
            (Some(audit_layer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(service_layer)
        .with(stdout_layer)
        .with(audit)
        .init();

    LogGuards {
        _service: service_guard,
        _audit: audit_guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
    use crate::core_types::ChainId;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_directives_parse() {
        let directives = default_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_audit_targets_only_pass_audit() {
        let targets = audit_targets();
        assert!(targets.would_enable(AUDIT_TARGET, &Level::WARN));
        assert!(!targets.would_enable(AUDIT_TARGET, &Level::DEBUG));
        assert!(!targets.would_enable("deposit_sentinel::sweep::engine", &Level::ERROR));
    }

    #[test]
    fn test_audit_file_gets_flat_audit_records_only() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::registry().with(audit_layer(move || sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            TracingAuditSink.emit(AuditEvent::SweepFailed {
                deposit_id: uuid::Uuid::nil(),
                chain: ChainId::Solana,
                asset: "USDC".to_string(),
                code: "TIMEOUT",
                reason: "slow rpc".to_string(),
            });
            tracing::error!("service chatter");
        });

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("\"event\":\"sweep_failed\""));
        assert!(out.contains("\"code\":\"TIMEOUT\""));
        assert!(!out.contains("service chatter"));
    }
}
