//! 测试用内存连接
//!
//! 模拟 SFTP 文件树（含权限保护前缀）和少量 shell 命令（mv / rm / mkdir / ln），
//! 其他命令返回预设的输出

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;

use crate::domain::{RemoteOptions, TunnelRoute};
use crate::error::{RemoteError, RemoteResult};
use crate::infra::transport::{
    Connection, Connector, FileKind, FileTransfer, ForwardStream, OutputSink,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    File(Vec<u8>),
    Dir,
    Link(String),
}

#[derive(Clone)]
struct Response {
    exit_code: u32,
    stdout: Vec<Vec<u8>>,
    stderr: Vec<u8>,
}

#[derive(Default)]
struct FakeFs {
    nodes: Mutex<BTreeMap<String, Node>>,
    protected: Mutex<Vec<String>>,
    writes: AtomicUsize,
}

impl FakeFs {
    fn is_protected(&self, path: &str) -> bool {
        self.protected
            .lock()
            .unwrap()
            .iter()
            .any(|p| path == p || path.starts_with(&format!("{}/", p)))
    }

    fn parent_exists(&self, path: &str) -> bool {
        match parent_of(path) {
            None => true,
            Some(parent) => matches!(self.nodes.lock().unwrap().get(&parent), Some(Node::Dir)),
        }
    }

    fn check_writable(&self, path: &str) -> RemoteResult<()> {
        if self.is_protected(path) {
            return Err(RemoteError::PermissionDenied(path.to_string()));
        }
        if !self.parent_exists(path) {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        Ok(())
    }
}

fn parent_of(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        None => None,
        Some(("", _)) => None,
        Some((parent, _)) => Some(parent.to_string()),
    }
}

#[async_trait]
impl FileTransfer for FakeFs {
    async fn read(&self, path: &str) -> RemoteResult<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(_) => Err(RemoteError::Sftp {
                path: path.to_string(),
                message: "not a regular file".to_string(),
            }),
            None => Err(RemoteError::NotFound(path.to_string())),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> RemoteResult<()> {
        self.check_writable(path)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.nodes
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::File(data.to_vec()));
        Ok(())
    }

    async fn unlink(&self, path: &str) -> RemoteResult<()> {
        if self.is_protected(path) {
            return Err(RemoteError::PermissionDenied(path.to_string()));
        }
        match self.nodes.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(path.to_string())),
        }
    }

    async fn stat(&self, path: &str) -> RemoteResult<Option<FileKind>> {
        let nodes = self.nodes.lock().unwrap();
        let mut current = path.to_string();
        for _ in 0..8 {
            match nodes.get(&current) {
                None => return Ok(None),
                Some(Node::File(_)) => return Ok(Some(FileKind::File)),
                Some(Node::Dir) => return Ok(Some(FileKind::Directory)),
                Some(Node::Link(target)) => current = target.clone(),
            }
        }
        Ok(Some(FileKind::Other))
    }

    async fn mkdir(&self, path: &str) -> RemoteResult<()> {
        self.check_writable(path)?;
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(RemoteError::Sftp {
                path: path.to_string(),
                message: "already exists".to_string(),
            });
        }
        nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    async fn read_link(&self, path: &str) -> RemoteResult<String> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::Link(target)) => Ok(target.clone()),
            Some(_) => Err(RemoteError::Sftp {
                path: path.to_string(),
                message: "not a link".to_string(),
            }),
            None => Err(RemoteError::NotFound(path.to_string())),
        }
    }

    async fn symlink(&self, path: &str, target: &str) -> RemoteResult<()> {
        self.check_writable(path)?;
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(RemoteError::Sftp {
                path: path.to_string(),
                message: "already exists".to_string(),
            });
        }
        nodes.insert(path.to_string(), Node::Link(target.to_string()));
        Ok(())
    }
}

/// 内存远程主机
pub struct FakeRemote {
    fs: Arc<FakeFs>,
    responses: Mutex<HashMap<String, Response>>,
    /// 优先于 `responses` 的一次性输出
    once: Mutex<HashMap<String, VecDeque<Response>>>,
    /// 执行某条命令后开始保护的路径前缀
    protect_after: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    forwards: Mutex<Vec<TunnelRoute>>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fs: Arc::new(FakeFs::default()),
            responses: Mutex::new(HashMap::new()),
            once: Mutex::new(HashMap::new()),
            protect_after: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            forwards: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        })
    }

    /// 预设命令输出，`command` 为去掉 cd/sudo/env 前缀后的命令
    pub fn respond(&self, command: &str, exit_code: u32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            Response {
                exit_code,
                stdout: vec![stdout.as_bytes().to_vec()],
                stderr: stderr.as_bytes().to_vec(),
            },
        );
    }

    /// 预设只生效一次的输出，用完后回落到 `respond` 的设置
    pub fn respond_once(&self, command: &str, exit_code: u32, stdout: &str, stderr: &str) {
        self.once
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(Response {
                exit_code,
                stdout: vec![stdout.as_bytes().to_vec()],
                stderr: stderr.as_bytes().to_vec(),
            });
    }

    /// 预设分块的 stdout
    pub fn respond_chunks(&self, command: &str, exit_code: u32, chunks: &[&str]) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            Response {
                exit_code,
                stdout: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                stderr: Vec::new(),
            },
        );
    }

    /// `command` 执行之后再对 `prefix` 启用保护
    pub fn protect_after(&self, command: &str, prefix: &str) {
        self.protect_after
            .lock()
            .unwrap()
            .insert(command.to_string(), prefix.to_string());
    }

    /// 对非 sudo 写入返回权限错误的前缀
    pub fn protect(&self, prefix: &str) {
        self.fs.protected.lock().unwrap().push(prefix.to_string());
    }

    pub fn add_dir(&self, path: &str) {
        self.fs
            .nodes
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::Dir);
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.fs
            .nodes
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::File(content.to_vec()));
    }

    pub fn node(&self, path: &str) -> Option<Node> {
        self.fs.nodes.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.fs.nodes.lock().unwrap().keys().cloned().collect()
    }

    /// SFTP 写入次数
    pub fn write_count(&self) -> usize {
        self.fs.writes.load(Ordering::SeqCst)
    }

    /// 已执行的完整命令行
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn forwards(&self) -> Vec<TunnelRoute> {
        self.forwards.lock().unwrap().clone()
    }

    /// 模拟连接断开
    pub fn drop_connection(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_notify.notify_waiters();
    }

    fn builtin(&self, sudo: bool, words: &[String]) -> Option<Response> {
        let ok = Response {
            exit_code: 0,
            stdout: vec![],
            stderr: vec![],
        };
        let denied = |path: &str| Response {
            exit_code: 1,
            stdout: vec![],
            stderr: format!("{}: Permission denied\n", path).into_bytes(),
        };

        let args: Vec<&str> = words[1..]
            .iter()
            .map(String::as_str)
            .filter(|a| !a.starts_with('-'))
            .collect();
        let mut nodes = self.fs.nodes.lock().unwrap();

        match words[0].as_str() {
            "mv" if args.len() == 2 => {
                if !sudo && self.fs.is_protected(args[1]) {
                    return Some(denied(args[1]));
                }
                match nodes.remove(args[0]) {
                    Some(node) => {
                        nodes.insert(args[1].to_string(), node);
                        Some(ok)
                    }
                    None => Some(Response {
                        exit_code: 1,
                        stdout: vec![],
                        stderr: b"mv: cannot stat\n".to_vec(),
                    }),
                }
            }
            "rm" => {
                for path in &args {
                    if !sudo && self.fs.is_protected(path) {
                        return Some(denied(path));
                    }
                    nodes.remove(*path);
                }
                Some(ok)
            }
            "mkdir" => {
                for path in &args {
                    if !sudo && self.fs.is_protected(path) {
                        return Some(denied(path));
                    }
                    let mut current = String::new();
                    for part in path.split('/') {
                        if part.is_empty() {
                            current.push('/');
                            continue;
                        }
                        if !current.is_empty() && !current.ends_with('/') {
                            current.push('/');
                        }
                        current.push_str(part);
                        nodes.entry(current.clone()).or_insert(Node::Dir);
                    }
                }
                Some(ok)
            }
            "ln" if args.len() == 2 => {
                if !sudo && self.fs.is_protected(args[1]) {
                    return Some(denied(args[1]));
                }
                nodes.insert(args[1].to_string(), Node::Link(args[0].to_string()));
                Some(ok)
            }
            _ => None,
        }
    }
}

/// 去掉 `cd DIR &&`、`sudo`、`env K=V` 前缀，返回 (sudo, 剩余词)
fn strip_prefixes(line: &str) -> (bool, Vec<String>) {
    let mut words = shell_words::split(line).unwrap_or_default();
    if words.first().map(String::as_str) == Some("cd") && words.get(2).map(String::as_str) == Some("&&") {
        words.drain(..3);
    }
    let mut sudo = false;
    if words.first().map(String::as_str) == Some("sudo") {
        sudo = true;
        words.remove(0);
    }
    if words.first().map(String::as_str) == Some("env") {
        words.remove(0);
        while words.first().map(|w| w.contains('=')).unwrap_or(false) {
            words.remove(0);
        }
    }
    (sudo, words)
}

#[async_trait]
impl Connection for FakeRemote {
    async fn exec(&self, command_line: &str, sink: &mut (dyn OutputSink + Send)) -> RemoteResult<u32> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::Channel("connection closed".to_string()));
        }
        self.commands.lock().unwrap().push(command_line.to_string());

        let (sudo, words) = strip_prefixes(command_line);
        if words.is_empty() {
            return Ok(0);
        }
        let armed = self.protect_after.lock().unwrap().remove(&words.join(" "));
        if let Some(prefix) = armed {
            self.protect(&prefix);
        }

        let response = match self.builtin(sudo, &words) {
            Some(response) => response,
            None => {
                let key = words.join(" ");
                let once = self
                    .once
                    .lock()
                    .unwrap()
                    .get_mut(&key)
                    .and_then(VecDeque::pop_front);
                once.or_else(|| self.responses.lock().unwrap().get(&key).cloned())
                    .unwrap_or(Response {
                        exit_code: 0,
                        stdout: vec![],
                        stderr: vec![],
                    })
            }
        };

        for chunk in &response.stdout {
            sink.stdout(chunk);
        }
        if !response.stderr.is_empty() {
            sink.stderr(&response.stderr);
        }
        Ok(response.exit_code)
    }

    fn files(&self) -> Arc<dyn FileTransfer> {
        self.fs.clone()
    }

    async fn forward_out(&self, route: &TunnelRoute) -> RemoteResult<Box<dyn ForwardStream>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::Channel("connection closed".to_string()));
        }
        self.forwards.lock().unwrap().push(route.clone());

        // 远端是一个 echo 服务
        let (near, mut far) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match far.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if far.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Box::new(near))
    }

    async fn closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    async fn close(&self) {
        self.drop_connection();
    }
}

/// 按顺序返回预设结果的连接工厂
pub struct FakeConnector {
    outcomes: Mutex<VecDeque<Result<Arc<FakeRemote>, String>>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(outcomes: Vec<Result<Arc<FakeRemote>, String>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _remote: &RemoteOptions) -> RemoteResult<Arc<dyn Connection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().unwrap().pop_front();
        match next {
            Some(Ok(remote)) => Ok(remote),
            Some(Err(message)) => Err(RemoteError::Connect(message)),
            None => Err(RemoteError::Connect("host unreachable".to_string())),
        }
    }
}
