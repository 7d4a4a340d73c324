use std::io::Write;

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;

/// Installs the global logger.
///
/// - Dependencies log at `warn` unless `RUST_LOG` says otherwise
/// - This crate logs at `debug` when `verbose`, `info` otherwise
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module("tweet_multi_collector", level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .try_init();
}
