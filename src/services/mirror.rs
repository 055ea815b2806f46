//! 内置同步钩子
//!
//! 把变化的本地文件原样镜像到远程工作目录，内容未变时不写入

use std::io::ErrorKind;

use anyhow::Context;
use tracing::{debug, info};

use crate::domain::{ChangeType, FileChangeResult};
use crate::services::hooks::{Deployed, FileChanged, Hooks};

/// 默认钩子集合
pub fn mirror_hooks() -> Hooks {
    Hooks::new()
        .on_file_changed(mirror_file)
        .on_deployed(|args: Deployed| async move {
            info!(
                target = %args.session.name(),
                files = args.changed_files.len(),
                "Remote up to date"
            );
            for file in &args.changed_files {
                debug!(path = %file, "Deployed");
            }
            Ok(())
        })
}

async fn mirror_file(args: FileChanged) -> anyhow::Result<FileChangeResult> {
    let remote_path = args.remote_path();

    let content = if args.change_type == ChangeType::Remove {
        None
    } else {
        match tokio::fs::read(&args.absolute_path).await {
            Ok(data) => Some(data),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", args.absolute_path.display()))
            }
        }
    };

    let changed = args
        .session
        .fs()
        .ensure_file_is(&remote_path, content.as_deref(), false)
        .await
        .with_context(|| format!("while deploying {}", args.local_path))?;

    if changed {
        debug!(local = %args.local_path, remote = %remote_path, change = %args.change_type, "Synced");
        Ok(FileChangeResult::changed(remote_path))
    } else {
        Ok(FileChangeResult::Skipped)
    }
}
