//! `queue` 模块是宿主环境中的下载队列服务
//!
//! 主要包括：
//! - `actor`: `DownloadQueueActor`，持有任务记录并调度传输
//! - `state`: 任务 id、任务记录与状态
//! - `messages`: Actor 之间传递的消息与广播事件
//! - `handlers`: 消息处理器
//! - `transfer`: 实际的 HTTP 下载逻辑
//! - `retry`: 重试策略
//! - `util`: 缓冲写入与限速

pub mod actor;
pub mod state;
pub mod messages;
pub mod handlers;
pub mod transfer;
pub mod retry;
pub mod util;

pub use actor::{DownloadQueueActor, QueueSettings};
pub use messages::{
    DownloadRequest, Enqueue, ListJobs, NotificationClicked, PauseJob, QueryJob, QueueEvent,
    RemoveJob, ResumeJob, Subscribe, Unsubscribe,
};
pub use retry::{RetryContext, RetryStrategy};
pub use state::{DownloadStatus, JobId, JobRecord, JobState, Progress};
