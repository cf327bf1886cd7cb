use std::sync::Once;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::TestWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

use crate::settings::LogFormat;

static INIT: Once = Once::new();

fn build_env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn fmt_layer<W>(log_format: LogFormat, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_writer(writer);
    match log_format {
        LogFormat::Text => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn install<W>(log_format: LogFormat, default_level: &str, writer: W) -> anyhow::Result<()>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let mut init_result: Option<anyhow::Result<()>> = None;
    INIT.call_once(|| {
        let layer = fmt_layer(log_format, writer).with_filter(build_env_filter(default_level));
        init_result = Some(
            tracing_subscriber::registry()
                .with(layer)
                .try_init()
                .map_err(anyhow::Error::from),
        );
    });
    init_result.unwrap_or(Ok(()))
}

/// Initialize tracing once for the process.
///
/// `RUST_LOG` wins over `default_level`. The `log_format` parameter controls
/// whether logs are output as human-readable text or structured JSON.
/// Logs go to stderr; stdout is left to command output such as
/// `systestctl up --json`. Later calls are no-ops.
pub fn init(log_format: LogFormat, default_level: &str) -> anyhow::Result<()> {
    install(log_format, default_level, std::io::stderr)
}

/// Run an async test body with tracing installed.
pub async fn with_test_tracing<F, Fut, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let _ = install(LogFormat::Text, "info", TestWriter::new());
    tracing::debug!(test = test_name, "starting test");
    f().await
}

/// Run a sync test body with tracing installed.
/// This is the synchronous equivalent of `with_test_tracing`.
pub fn with_test_tracing_sync<F, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    let _ = install(LogFormat::Text, "info", TestWriter::new());
    tracing::debug!(test = test_name, "starting test");
    f()
}
