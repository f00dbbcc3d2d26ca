//! Process logging. Structured `tracing` output to stdout, filtered by `RUST_LOG`
//! (defaulting to `info`) the way most of this stack's services configure it; the OTLP
//! export pipeline is out of scope here (see DESIGN.md).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
