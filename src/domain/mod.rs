//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio/russh

pub mod deploy;
pub mod systemd;
pub mod target;
pub mod tunnel;

// Re-exports for convenience
pub use deploy::{ChangeType, FileChangeResult};
pub use systemd::{RestartPolicy, ServiceType, ServiceUnit, UnitFile, UnitSection};
pub use target::{AuthMethod, DevServerOptions, RemoteOptions, Target, WatchOptions};
pub use tunnel::{ForwardSpec, TunnelRoute};
