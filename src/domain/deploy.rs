//! 部署相关领域模型

use std::fmt;

/// 文件变更类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    /// 新增文件
    Add,
    /// 文件内容被清空
    Empty,
    /// 文件内容变化（包括启动时的首次触发）
    Change,
    /// 文件被删除
    Remove,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Empty => "empty",
            ChangeType::Change => "change",
            ChangeType::Remove => "remove",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `on_file_changed` 钩子的返回值
#[derive(Clone, Debug, PartialEq)]
pub enum FileChangeResult {
    /// 远程上被修改的路径列表
    Changed(Vec<String>),
    /// 钩子自行处理完毕，无需汇总
    HandledInternally,
    /// 跳过此文件
    Skipped,
    /// 钩子产出的二进制内容（不计入批次路径）
    Blob(Vec<u8>),
}

impl FileChangeResult {
    /// 单个远程路径
    pub fn changed(path: impl Into<String>) -> Self {
        FileChangeResult::Changed(vec![path.into()])
    }

    /// 需要并入部署批次的远程路径
    pub fn changed_files(&self) -> &[String] {
        match self {
            FileChangeResult::Changed(files) => files,
            _ => &[],
        }
    }
}

impl From<bool> for FileChangeResult {
    fn from(handled: bool) -> Self {
        if handled {
            FileChangeResult::HandledInternally
        } else {
            FileChangeResult::Skipped
        }
    }
}

impl From<Vec<String>> for FileChangeResult {
    fn from(files: Vec<String>) -> Self {
        FileChangeResult::Changed(files)
    }
}
