//! 远程命令执行器
//!
//! 提供统一的远程命令执行接口，支持：
//! - 参数逐个 shell 转义
//! - sudo / 环境变量 / 工作目录
//! - 按行输出到日志或回调
//! - 大输出时不累积 stdout/stderr

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{RemoteError, RemoteResult};
use crate::infra::transport::{Connection, OutputSink};

/// 输出流
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// 行回调
pub type LineHandler = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

/// 命令执行选项
#[derive(Clone, Default)]
pub struct RunOptions {
    /// 以 sudo 执行
    pub sudo: bool,
    /// 额外环境变量（有序，保证命令行稳定）
    pub env: BTreeMap<String, String>,
    /// 远程工作目录
    pub working_directory: Option<String>,
    /// 把输出逐行写入日志
    pub logging: bool,
    /// 逐行回调
    pub line_handler: Option<LineHandler>,
    /// 非零退出码时正常返回而不是报错
    pub resolve_error: bool,
    /// 是否丢弃输出；`None` 表示有日志或行回调时丢弃
    pub discard_output: Option<bool>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn logging(mut self) -> Self {
        self.logging = true;
        self
    }

    pub fn on_line<F>(mut self, handler: F) -> Self
    where
        F: Fn(OutputStream, &str) + Send + Sync + 'static,
    {
        self.line_handler = Some(Arc::new(handler));
        self
    }

    pub fn resolve_error(mut self) -> Self {
        self.resolve_error = true;
        self
    }

    pub fn discard_output(mut self, discard: bool) -> Self {
        self.discard_output = Some(discard);
        self
    }

    fn line_mode(&self) -> bool {
        self.logging || self.line_handler.is_some()
    }

    fn discards_output(&self) -> bool {
        self.discard_output.unwrap_or_else(|| self.line_mode())
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("sudo", &self.sudo)
            .field("env", &self.env)
            .field("working_directory", &self.working_directory)
            .field("logging", &self.logging)
            .field("line_handler", &self.line_handler.is_some())
            .field("resolve_error", &self.resolve_error)
            .field("discard_output", &self.discard_output)
            .finish()
    }
}

/// 命令执行结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 远程命令执行器
pub struct CommandRunner;

impl CommandRunner {
    /// 组装完整命令行
    ///
    /// `command` 原样输出（调用方负责其安全性），`args` 逐个转义
    pub fn command_line(command: &str, args: &[&str], opts: &RunOptions) -> String {
        let mut line = String::new();

        if let Some(ref dir) = opts.working_directory {
            line.push_str("cd ");
            line.push_str(&shell_words::quote(dir));
            line.push_str(" && ");
        }

        if opts.sudo {
            line.push_str("sudo ");
        }

        if !opts.env.is_empty() {
            line.push_str("env ");
            for (key, value) in &opts.env {
                line.push_str(&shell_words::quote(&format!("{}={}", key, value)));
                line.push(' ');
            }
        }

        line.push_str(command);

        for arg in args {
            line.push(' ');
            line.push_str(&shell_words::quote(arg));
        }

        line
    }

    /// 在连接上执行命令
    pub async fn run(
        conn: &dyn Connection,
        command: &str,
        args: &[&str],
        opts: &RunOptions,
    ) -> RemoteResult<CommandOutput> {
        let line = Self::command_line(command, args, opts);
        debug!(command = %line, "Running remote command");

        let mut sink = RunSink::new(&line, opts);
        let exit_code = conn.exec(&line, &mut sink).await?;
        let (stdout, stderr, stderr_tail) = sink.finish();

        if exit_code != 0 && !opts.resolve_error {
            return Err(RemoteError::CommandFailed {
                command: line,
                exit_code,
                stderr: if stderr.is_empty() { stderr_tail } else { stderr },
            });
        }

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// 按 `\n` 切分的字节缓冲，未完成的行保留到下一块
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(i) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(i + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }

    /// 通道关闭时取出剩余的不完整行
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end().to_string())
    }
}

/// 丢弃输出时仍保留的 stderr 末尾字节数，用于错误信息
const STDERR_TAIL_BYTES: usize = 4096;

struct RunSink<'a> {
    command: &'a str,
    opts: &'a RunOptions,
    capture: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stderr_tail: Vec<u8>,
    stdout_lines: LineBuffer,
    stderr_lines: LineBuffer,
}

impl<'a> RunSink<'a> {
    fn new(command: &'a str, opts: &'a RunOptions) -> Self {
        Self {
            command,
            opts,
            capture: !opts.discards_output(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            stderr_tail: Vec::new(),
            stdout_lines: LineBuffer::default(),
            stderr_lines: LineBuffer::default(),
        }
    }

    fn emit(&self, stream: OutputStream, line: &str) {
        if self.opts.logging {
            match stream {
                OutputStream::Stdout => info!(command = %self.command, "{}", line),
                OutputStream::Stderr => warn!(command = %self.command, "{}", line),
            }
        }
        if let Some(ref handler) = self.opts.line_handler {
            handler(stream, line);
        }
    }

    /// 返回 (stdout, stderr, stderr 末尾)
    fn finish(mut self) -> (String, String, String) {
        if self.opts.line_mode() {
            if let Some(line) = self.stdout_lines.finish() {
                self.emit(OutputStream::Stdout, &line);
            }
            if let Some(line) = self.stderr_lines.finish() {
                self.emit(OutputStream::Stderr, &line);
            }
        }
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
            String::from_utf8_lossy(&self.stderr_tail).into_owned(),
        )
    }
}

impl OutputSink for RunSink<'_> {
    fn stdout(&mut self, chunk: &[u8]) {
        if self.capture {
            self.stdout.extend_from_slice(chunk);
        }
        if self.opts.line_mode() {
            for line in self.stdout_lines.push(chunk) {
                self.emit(OutputStream::Stdout, &line);
            }
        }
    }

    fn stderr(&mut self, chunk: &[u8]) {
        if self.capture {
            self.stderr.extend_from_slice(chunk);
        } else {
            self.stderr_tail.extend_from_slice(chunk);
            let excess = self.stderr_tail.len().saturating_sub(STDERR_TAIL_BYTES);
            self.stderr_tail.drain(..excess);
        }
        if self.opts.line_mode() {
            for line in self.stderr_lines.push(chunk) {
                self.emit(OutputStream::Stderr, &line);
            }
        }
    }
}
