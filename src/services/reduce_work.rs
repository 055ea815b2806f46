//! 远程工作锁
//!
//! 用远程文件记录"某个耗时操作最近执行过"，在过期窗口内跳过重复执行。
//! 标记文件位于 `.rdt/locks/<name>`，内容为毫秒时间戳加换行

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use crate::error::RemoteResult;
use crate::services::session::Session;

/// 锁文件目录（相对于远程用户主目录）
pub const LOCK_DIR: &str = ".rdt/locks";

pub struct ReduceWork<'a> {
    session: &'a Session,
}

/// 持有锁期间返回给调用方，工作完成后调用 `release`
#[must_use = "call release() after the protected work, or abandon() on failure"]
pub struct LockReleaser<'a> {
    session: &'a Session,
    path: String,
}

impl<'a> ReduceWork<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// 检查锁，未持有或已过期时占用它
    ///
    /// 返回 `None` 表示最近 `expiration_hours` 小时内已执行过，应跳过
    pub async fn check_and_get_lock(
        &self,
        name: &str,
        expiration_hours: f64,
    ) -> RemoteResult<Option<LockReleaser<'a>>> {
        self.check_and_get_lock_at(name, expiration_hours, Utc::now())
            .await
    }

    pub(crate) async fn check_and_get_lock_at(
        &self,
        name: &str,
        expiration_hours: f64,
        now: DateTime<Utc>,
    ) -> RemoteResult<Option<LockReleaser<'a>>> {
        let path = lock_path(name);
        let fs = self.session.fs();

        match fs.read_file(&path).await {
            Ok(content) => match parse_marker(&content) {
                Some(created) if !is_expired(created, expiration_hours, now) => {
                    debug!(lock = %name, created = %created, "Lock held, skipping work");
                    return Ok(None);
                }
                Some(_) => debug!(lock = %name, "Lock expired"),
                None => warn!(lock = %name, "Lock marker unreadable, treating as expired"),
            },
            Err(e) if e.is_not_found() => debug!(lock = %name, "No lock marker"),
            Err(e) => return Err(e),
        }

        // 过期标记尽力删除
        if let Err(e) = fs.unlink(&path).await {
            if !e.is_not_found() {
                debug!(lock = %name, error = %e, "Failed to remove stale lock");
            }
        }

        // 立即占用，避免同一窗口内重复进入
        fs.ensure_file_is(&path, Some(format_marker(now).as_bytes()), false)
            .await?;

        Ok(Some(LockReleaser {
            session: self.session,
            path,
        }))
    }
}

impl LockReleaser<'_> {
    /// 工作完成，写入新的时间戳
    pub async fn release(self) -> RemoteResult<()> {
        self.release_at(Utc::now()).await
    }

    pub(crate) async fn release_at(self, now: DateTime<Utc>) -> RemoteResult<()> {
        self.session
            .fs()
            .ensure_file_is(&self.path, Some(format_marker(now).as_bytes()), false)
            .await?;
        debug!(path = %self.path, "Lock released");
        Ok(())
    }

    /// 工作失败，删除标记以便下次重试
    pub async fn abandon(self) -> RemoteResult<()> {
        self.session.fs().ensure_file_is(&self.path, None, false).await?;
        Ok(())
    }
}

/// 锁名中的 `/` 等字符替换掉，避免跳出锁目录
pub fn lock_path(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}/{}", LOCK_DIR, safe)
}

fn format_marker(now: DateTime<Utc>) -> String {
    format!("{}\n", now.timestamp_millis())
}

fn parse_marker(content: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(content).ok()?;
    let millis: i64 = text.trim().parse().ok()?;
    DateTime::from_timestamp_millis(millis)
}

/// 过期窗口上限（一百年）
const MAX_EXPIRATION_HOURS: f64 = 24.0 * 365.0 * 100.0;

fn is_expired(created: DateTime<Utc>, expiration_hours: f64, now: DateTime<Utc>) -> bool {
    // 时间戳在未来说明时钟被调过，视为过期
    if created > now {
        return true;
    }
    let hours = if expiration_hours.is_nan() {
        0.0
    } else {
        expiration_hours.clamp(0.0, MAX_EXPIRATION_HOURS)
    };
    let window = ChronoDuration::milliseconds((hours * 3_600_000.0) as i64);
    now - created >= window
}
