pub mod api;
pub mod core;

use std::sync::Once;

static LOGGING: Once = Once::new();

/// 初始化日志，只生效一次；`RUST_LOG` 优先于 `verbose`
pub fn init_logging(verbose: bool) {
    LOGGING.call_once(|| {
        let default_level = if verbose { "debug" } else { "info" };
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .try_init();
    });
}
