//! Node.js 版本探测与安装
//!
//! 普通主机用 apt 安装；ARMv6 没有官方构建，从 unofficial-builds 下载解压到 `/usr/local`

use semver::Version;
use tracing::{debug, info};

use crate::error::{RemoteError, RemoteResult};
use crate::infra::command::RunOptions;
use crate::services::session::Session;

/// unofficial-builds 发布目录
pub const UNOFFICIAL_BUILDS_URL: &str = "https://unofficial-builds.nodejs.org/download/release";

/// ARMv6 构建在 `files` 列中的名字
const ARMV6_BUILD: &str = "linux-armv6l";

const INDEX_COLUMNS: [&str; 11] = [
    "version", "date", "files", "npm", "v8", "uv", "zlib", "openssl", "modules", "lts", "security",
];

/// index.tab 中的一条发布记录
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRelease {
    pub version: Version,
    pub date: String,
    pub files: Vec<String>,
    /// LTS 代号，非 LTS 时为 `None`
    pub lts: Option<String>,
}

impl NodeRelease {
    /// 版本号文本（带 `v` 前缀）
    pub fn tag(&self) -> String {
        format!("v{}", self.version)
    }

    pub fn armv6_tarball_url(&self) -> String {
        let tag = self.tag();
        format!(
            "{}/{}/node-{}-{}.tar.xz",
            UNOFFICIAL_BUILDS_URL, tag, tag, ARMV6_BUILD
        )
    }
}

pub struct Node<'a> {
    session: &'a Session,
}

impl<'a> Node<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// 已安装的版本，未安装时返回 `None`
    pub async fn version(&self) -> RemoteResult<Option<Version>> {
        let out = self
            .session
            .run("node", &["--version"], &RunOptions::new().resolve_error())
            .await?;
        if !out.success() {
            debug!(exit_code = out.exit_code, "node not installed");
            return Ok(None);
        }
        parse_version(&out.stdout).map(Some).ok_or_else(|| RemoteError::UnexpectedOutput {
            command: "node --version".to_string(),
            output: out.stdout.clone(),
        })
    }

    /// 确保安装了主版本为 `major` 的 Node.js
    ///
    /// 返回是否执行了安装
    pub async fn install(&self, major: u64) -> RemoteResult<bool> {
        if let Some(current) = self.version().await? {
            if current.major == major {
                debug!(version = %current, "Node.js already installed");
                return Ok(false);
            }
            info!(current = %current, wanted = major, "Replacing Node.js");
        }

        if self.session.platform().is_armv6().await? {
            self.install_armv6(major).await?;
        } else {
            self.session.apt().install(&["nodejs"]).await?;
        }

        // apt 装的是发行版自带的版本，不一定是要求的主版本
        match self.version().await? {
            Some(installed) if installed.major == major => {
                info!(version = %installed, "Node.js installed");
                Ok(true)
            }
            installed => Err(RemoteError::VersionMismatch {
                package: "nodejs".to_string(),
                wanted: major.to_string(),
                installed: installed.map(|v| v.to_string()),
            }),
        }
    }

    async fn install_armv6(&self, major: u64) -> RemoteResult<()> {
        let index_url = format!("{}/index.tab", UNOFFICIAL_BUILDS_URL);
        let out = self
            .session
            .run("curl", &["-fsSL", &index_url], &RunOptions::new())
            .await?;

        let releases = parse_unofficial_index(&out.stdout)?;
        let release = pick_release(&releases, major, ARMV6_BUILD).ok_or_else(|| {
            RemoteError::UnexpectedOutput {
                command: format!("curl {}", index_url),
                output: format!("no {} build for Node.js {}", ARMV6_BUILD, major),
            }
        })?;

        let url = release.armv6_tarball_url();
        info!(version = %release.tag(), url = %url, "Installing unofficial Node.js build");

        // 管道需要 shell，URL 单独转义
        let command = format!(
            "curl -fsSL {} | sudo tar -xJ -C /usr/local --strip-components=1 --exclude CHANGELOG.md --exclude LICENSE --exclude README.md",
            shell_words::quote(&url)
        );
        self.session
            .run("sh", &["-c", &command], &RunOptions::new().logging())
            .await?;
        Ok(())
    }
}

fn parse_version(text: &str) -> Option<Version> {
    Version::parse(text.trim().trim_start_matches('v')).ok()
}

/// 解析 unofficial-builds 的 index.tab
pub fn parse_unofficial_index(text: &str) -> RemoteResult<Vec<NodeRelease>> {
    let unexpected = |output: String| RemoteError::UnexpectedOutput {
        command: "index.tab".to_string(),
        output,
    };

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| unexpected("empty index".to_string()))?
        .split('\t')
        .map(str::trim)
        .collect();
    if header != INDEX_COLUMNS {
        return Err(unexpected(format!("unexpected columns: {}", header.join(","))));
    }

    let mut releases = Vec::new();
    for line in lines {
        let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
        if parts.len() != INDEX_COLUMNS.len() {
            continue;
        }
        let Some(version) = parse_version(parts[0]) else {
            continue;
        };
        releases.push(NodeRelease {
            version,
            date: parts[1].to_string(),
            files: parts[2].split(',').map(|f| f.trim().to_string()).collect(),
            lts: Some(parts[9]).filter(|lts| *lts != "-").map(str::to_string),
        });
    }
    Ok(releases)
}

/// 指定主版本中带有 `build` 的最新发布
pub fn pick_release<'r>(releases: &'r [NodeRelease], major: u64, build: &str) -> Option<&'r NodeRelease> {
    releases
        .iter()
        .filter(|r| r.version.major == major && r.files.iter().any(|f| f == build))
        .max_by(|a, b| a.version.cmp(&b.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::testing::FakeRemote;
    use crate::services::session::tests::connected_session;

    const INDEX: &str = "version\tdate\tfiles\tnpm\tv8\tuv\tzlib\topenssl\tmodules\tlts\tsecurity
v21.6.0\t2024-01-14\tlinux-arm64,linux-armv6l\t10.2.4\t11.8.172.17\t1.47.0\t1.3.0.1-motley\t3.0.12+quic\t120\t-\tfalse
v20.11.0\t2024-01-09\tlinux-arm64,linux-armv6l,linux-x64-musl\t10.2.4\t11.3.244.8\t1.46.0\t1.3.0.1-motley\t3.0.12+quic\t115\tIron\tfalse
v20.11.1\t2024-02-14\tlinux-x64-musl\t10.2.4\t11.3.244.8\t1.46.0\t1.3.0.1-motley\t3.0.13+quic\t115\tIron\ttrue
v20.10.0\t2023-11-22\tlinux-armv6l\t10.2.3\t11.3.244.8\t1.46.0\t1.2.13.1-motley\t3.0.12+quic\t115\tIron\tfalse
";

    #[test]
    fn test_parse_index() {
        let releases = parse_unofficial_index(INDEX).unwrap();
        assert_eq!(releases.len(), 4);
        assert_eq!(releases[0].lts, None);
        assert_eq!(releases[1].lts.as_deref(), Some("Iron"));
        assert_eq!(releases[1].files.len(), 3);
    }

    #[test]
    fn test_pick_newest_with_build() {
        let releases = parse_unofficial_index(INDEX).unwrap();
        let pick = pick_release(&releases, 20, "linux-armv6l").unwrap();
        assert_eq!(pick.tag(), "v20.11.0");
        assert_eq!(
            pick.armv6_tarball_url(),
            "https://unofficial-builds.nodejs.org/download/release/v20.11.0/node-v20.11.0-linux-armv6l.tar.xz"
        );
        assert!(pick_release(&releases, 18, "linux-armv6l").is_none());
    }

    #[test]
    fn test_rejects_unknown_columns() {
        assert!(parse_unofficial_index("version\tdate\n").is_err());
    }

    #[tokio::test]
    async fn test_version_probe() {
        let remote = FakeRemote::new();
        remote.respond("node --version", 127, "", "sh: node: not found\n");
        let session = connected_session(remote.clone()).await;
        assert_eq!(session.node().version().await.unwrap(), None);

        remote.respond("node --version", 0, "v20.11.0\n", "");
        assert_eq!(
            session.node().version().await.unwrap(),
            Some(Version::new(20, 11, 0))
        );
    }

    #[tokio::test]
    async fn test_install_skips_matching_major() {
        let remote = FakeRemote::new();
        remote.respond("node --version", 0, "v20.1.0\n", "");
        let session = connected_session(remote.clone()).await;

        assert!(!session.node().install(20).await.unwrap());
        assert_eq!(remote.commands(), vec!["node --version"]);
    }

    #[tokio::test]
    async fn test_install_armv6_uses_unofficial_build() {
        let remote = FakeRemote::new();
        remote.respond_once("node --version", 127, "", "");
        remote.respond("node --version", 0, "v20.11.0\n", "");
        remote.respond("uname -m", 0, "armv6l\n", "");
        remote.respond(
            "curl -fsSL https://unofficial-builds.nodejs.org/download/release/index.tab",
            0,
            INDEX,
            "",
        );
        let session = connected_session(remote.clone()).await;

        assert!(session.node().install(20).await.unwrap());
        let commands = remote.commands();
        let unpack = commands.iter().find(|c| c.starts_with("sh -c ")).unwrap();
        assert!(unpack.contains("node-v20.11.0-linux-armv6l.tar.xz"));
        assert!(!remote.commands().iter().any(|c| c.contains("apt-get")));
    }

    #[tokio::test]
    async fn test_install_uses_apt_elsewhere() {
        let remote = FakeRemote::new();
        remote.respond_once("node --version", 127, "", "");
        remote.respond("node --version", 0, "v20.9.0\n", "");
        remote.respond("uname -m", 0, "aarch64\n", "");
        let session = connected_session(remote.clone()).await;

        assert!(session.node().install(20).await.unwrap());
        assert!(remote
            .commands()
            .iter()
            .any(|c| c.contains("apt-get install -y nodejs")));
    }

    #[tokio::test]
    async fn test_install_fails_when_apt_ships_other_major() {
        let remote = FakeRemote::new();
        remote.respond_once("node --version", 127, "", "");
        remote.respond("node --version", 0, "v18.19.0\n", "");
        remote.respond("uname -m", 0, "aarch64\n", "");
        let session = connected_session(remote.clone()).await;

        match session.node().install(20).await {
            Err(RemoteError::VersionMismatch {
                wanted, installed, ..
            }) => {
                assert_eq!(wanted, "20");
                assert_eq!(installed.as_deref(), Some("18.19.0"));
            }
            other => panic!("expected version mismatch, got {:?}", other),
        }
    }
}
