//! 远程平台探测

use crate::error::RemoteResult;
use crate::infra::command::RunOptions;
use crate::services::session::Session;

pub struct Platform<'a> {
    session: &'a Session,
}

impl<'a> Platform<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// `uname -m`
    pub async fn machine(&self) -> RemoteResult<String> {
        let out = self.session.run("uname", &["-m"], &RunOptions::new()).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// 是否 ARMv6（树莓派 Zero / 1 代）
    pub async fn is_armv6(&self) -> RemoteResult<bool> {
        Ok(self.machine().await?.starts_with("armv6"))
    }
}

#[cfg(test)]
mod tests {
    use crate::infra::testing::FakeRemote;
    use crate::services::session::tests::connected_session;

    #[tokio::test]
    async fn test_is_armv6() {
        let remote = FakeRemote::new();
        remote.respond("uname -m", 0, "armv6l\n", "");
        let session = connected_session(remote.clone()).await;
        assert_eq!(session.platform().machine().await.unwrap(), "armv6l");
        assert!(session.platform().is_armv6().await.unwrap());

        remote.respond("uname -m", 0, "aarch64\n", "");
        assert!(!session.platform().is_armv6().await.unwrap());
    }
}
