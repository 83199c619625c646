use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

/// Installs the process-wide fmt subscriber once.
///
/// `RUST_LOG` wins when set; otherwise debug builds log at `debug` and
/// release builds at `info`.
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("info")
            }
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init()
            .ok();
    });
}
