//! Tracing subscriber setup for the CLI host.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Install a stderr `fmt` subscriber filtered by `GUESTRUN_LOG`, then `RUST_LOG`, default `warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("GUESTRUN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    // A second init (tests, embedding hosts) keeps the first subscriber.
    let _ = Registry::default().with(filter).with(fmt_layer).try_init();
}
