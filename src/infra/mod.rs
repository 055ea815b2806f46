//! 基础设施模块
//!
//! 封装外部依赖（SSH、SFTP、本地进程、日志）

pub mod command;
pub mod logging;
pub mod process;
pub mod sftp;
pub mod ssh;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use command::{CommandOutput, CommandRunner, OutputStream, RunOptions};
pub use process::LocalProcess;
pub use ssh::SshConnector;
pub use transport::{Connection, Connector, FileKind, FileTransfer, ForwardStream, OutputSink};
