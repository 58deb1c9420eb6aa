//! Test harness: simulated peers over in-memory stores plus a pull-based
//! replicator, used by the integration suites.

pub mod peer;
pub mod replicator;

pub use peer::TestPeer;
pub use replicator::Replicator;

/// Installs a tracing subscriber honoring `RUST_LOG`. Safe to call from
/// every test; only the first call wins.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
