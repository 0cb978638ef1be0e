// Observability infrastructure using tracing crate
// Structured logging for the server and the shutdown coordinator

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "graceful=info,hyper=warn";
const VERBOSE_FILTER: &str = "graceful=debug,hyper=info";

/// Initialize the observability system
/// Sets up structured logging to stdout with JSON formatting for machine parsing
pub fn init(verbose: bool) -> Result<()> {
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_thread_names(true);

    // RUST_LOG wins over the verbosity flag, e.g. RUST_LOG=graceful=trace
    let default_filter = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter_layer = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Create a span for tracing request handling
#[inline]
pub fn request_span(method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = method,
        path = path,
        request_id = %uuid::Uuid::new_v4(),
    )
}
