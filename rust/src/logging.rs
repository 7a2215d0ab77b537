use std::path::Path;
use std::sync::{Mutex, Once};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE: &str = "exit_core.log";

static INIT: Once = Once::new();

/// Install the global subscriber: stderr, `<data_dir>/exit_core.log` and, on iOS, os_log.
/// `RUST_LOG` overrides the default `info` filter. Later calls are no-ops.
pub fn init_logging(data_dir: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(data_dir).join(LOG_FILE))
            .ok();
        let file_layer = file.map(|f| fmt::layer().with_ansi(false).with_writer(Mutex::new(f)));

        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file_layer);

        #[cfg(target_os = "ios")]
        let registry = registry.with(tracing_oslog::OsLogger::new("app.exit.core", "default"));

        // Another subscriber may already be installed by a host test harness.
        let _ = registry.try_init();
    });
}
