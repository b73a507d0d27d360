use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 下载队列中任务的句柄，始终为正数
///
/// "没有上次任务" 用 `Option::None` 表示，不会占用任何 `JobId` 取值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// 从偏好设置中读出的整数还原任务 id，非正数（如 -1）视为没有任务
    pub fn from_persisted(raw: i64) -> Option<Self> {
        if raw > 0 { Some(Self(raw as u64)) } else { None }
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn as_persisted(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 对外暴露的下载状态，每次查询时从队列中得出，不做缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    Running,
    Paused,
    Failed,
    Succeeded,
    Unknown,
}

impl DownloadStatus {
    /// 仍在队列中等待或传输
    pub fn is_in_progress(self) -> bool {
        matches!(self, DownloadStatus::Pending | DownloadStatus::Running | DownloadStatus::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Failed | DownloadStatus::Succeeded)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DownloadStatus::Pending => "等待中",
            DownloadStatus::Running => "下载中",
            DownloadStatus::Paused => "已暂停",
            DownloadStatus::Failed => "失败",
            DownloadStatus::Succeeded => "已完成",
            DownloadStatus::Unknown => "未知",
        };
        f.write_str(s)
    }
}

/// 队列内部的任务状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Paused,
    Failed(String),
    Succeeded,
}

impl JobState {
    pub fn status(&self) -> DownloadStatus {
        match self {
            JobState::Pending => DownloadStatus::Pending,
            JobState::Running => DownloadStatus::Running,
            JobState::Paused => DownloadStatus::Paused,
            JobState::Failed(_) => DownloadStatus::Failed,
            JobState::Succeeded => DownloadStatus::Succeeded,
        }
    }
}

/// 字节进度，未知时均为 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub downloaded: u64,
    pub total: u64,
}

impl Progress {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.downloaded as f32 / self.total as f32) * 100.0
        }
    }
}

/// 队列持久化的任务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub source_url: String,
    pub title: String,
    pub target_name: String,
    pub save_path: PathBuf,
    pub state: JobState,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn status(&self) -> DownloadStatus {
        self.state.status()
    }

    pub fn progress(&self) -> Progress {
        Progress { downloaded: self.bytes_downloaded, total: self.total_bytes }
    }
}
