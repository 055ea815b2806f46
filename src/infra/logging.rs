//! 日志初始化
//!
//! 终端输出 + 可选的文件输出（非阻塞写入）

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::EnvConfig;

/// 初始化全局 subscriber
///
/// 返回的 guard 需要持有到进程退出，否则文件日志可能丢失尾部
pub fn init(config: &EnvConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_file {
        Some(ref file) => {
            let appender = tracing_appender::rolling::never(".", file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .try_init();
            None
        }
    }
}
