use actix::Message;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::core::error::UpdateError;
use super::state::{DownloadStatus, JobId, JobRecord};

/// 新下载任务的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source_url: String,
    pub title: String,
    pub target_name: String,
}

/// 队列向订阅者广播的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// 下载文件有变化
    Progress { job_id: JobId, downloaded: u64, total: u64 },
    /// 任务进入终态，成功和失败都会广播
    Completed { job_id: JobId, status: DownloadStatus },
    /// 用户点击了下载通知
    NotificationClicked { job_id: Option<JobId> },
}

/// 加入下载队列
pub struct Enqueue(pub DownloadRequest);
impl Message for Enqueue { type Result = Result<JobId, UpdateError>; }

/// 查询任务记录
pub struct QueryJob { pub job_id: JobId }
impl Message for QueryJob { type Result = Option<JobRecord>; }

/// 列出全部任务
pub struct ListJobs;
impl Message for ListJobs { type Result = Vec<JobRecord>; }

/// 暂停任务
pub struct PauseJob { pub job_id: JobId }
impl Message for PauseJob { type Result = Result<(), UpdateError>; }

/// 继续任务
pub struct ResumeJob { pub job_id: JobId }
impl Message for ResumeJob { type Result = Result<(), UpdateError>; }

/// 移除任务并删除其文件，返回任务之前是否存在
pub struct RemoveJob { pub job_id: JobId }
impl Message for RemoveJob { type Result = Result<bool, UpdateError>; }

/// 注册事件监听
pub struct Subscribe { pub sender: UnboundedSender<QueueEvent> }
impl Message for Subscribe { type Result = Uuid; }

/// 注销事件监听
pub struct Unsubscribe(pub Uuid);
impl Message for Unsubscribe { type Result = (); }

/// 模拟用户点击下载通知
pub struct NotificationClicked { pub job_id: Option<JobId> }
impl Message for NotificationClicked { type Result = (); }

/// 内部用于更新进度
pub struct TransferProgress {
    pub job_id: JobId,
    pub downloaded: u64,
    pub total: u64,
}
impl Message for TransferProgress { type Result = (); }

/// 内部用于标记传输结束，成功时带上写入的字节数
pub struct TransferFinished {
    pub job_id: JobId,
    pub result: Result<u64, UpdateError>,
}
impl Message for TransferFinished { type Result = (); }
