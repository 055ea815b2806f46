//! 服务层模块
//!
//! 会话门面及其上的远程操作、端口转发、文件监视编排

pub mod apt;
pub mod dev_server;
pub mod hooks;
pub mod mirror;
pub mod node;
pub mod platform;
pub mod reduce_work;
pub mod remote_fs;
pub mod session;
pub mod systemd;
pub mod tunnel;
pub mod watch;

pub use hooks::{ChangeInfo, Deployed, FileChanged, Hooks};
pub use mirror::mirror_hooks;
pub use session::{Session, SessionEvent, SessionState};
pub use systemd::ServiceOptions;
pub use tunnel::{TunnelHandle, TunnelServer};
pub use watch::WatchOrchestrator;
