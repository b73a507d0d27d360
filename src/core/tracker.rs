//! 下载任务跟踪器
//!
//! 对下载队列服务的一层薄封装：把队列里的任务记录翻译成 `DownloadStatus`，
//! 并把队列广播变成只针对某个任务的完成通知。

use actix::Addr;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use url::Url;

use crate::core::error::UpdateResult;
use crate::core::queue::{
    DownloadQueueActor, DownloadRequest, DownloadStatus, Enqueue, JobId, Progress, QueryJob,
    QueueEvent, RemoveJob, Subscribe, Unsubscribe,
};

/// 已完成下载的文件位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub path: PathBuf,
}

impl ArtifactLocation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `file://` 形式的地址，相对路径无法转换
    pub fn file_uri(&self) -> Option<Url> {
        let absolute = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        Url::from_file_path(absolute).ok()
    }

    pub fn file_name(&self) -> Option<String> {
        self.path.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}

/// 订阅者收到的信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSignal {
    /// 被跟踪的任务进入终态
    Completed { job_id: JobId, status: DownloadStatus },
    /// 用户点击了下载通知，希望查看下载列表
    ViewDownloadsRequested,
}

type ProgressObserver = Box<dyn FnMut(JobId, Progress)>;

/// 完成通知的订阅，析构时注销且只注销一次
pub struct CompletionSubscription {
    rx: mpsc::UnboundedReceiver<QueueEvent>,
    unsubscribe: Option<Box<dyn FnOnce()>>,
    progress_observer: Option<ProgressObserver>,
}

impl CompletionSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<QueueEvent>, unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
            progress_observer: None,
        }
    }

    /// 下载文件有变化时回调
    pub fn on_progress(mut self, observer: impl FnMut(JobId, Progress) + 'static) -> Self {
        self.progress_observer = Some(Box::new(observer));
        self
    }

    /// 等待与 `job_id` 相关的下一个信号，服务端关闭时返回 None
    pub async fn next_signal(&mut self, job_id: JobId) -> Option<CompletionSignal> {
        while let Some(event) = self.rx.recv().await {
            match event {
                QueueEvent::Completed { job_id: done, status } if done == job_id => {
                    return Some(CompletionSignal::Completed { job_id, status });
                }
                QueueEvent::NotificationClicked { job_id: clicked }
                    if clicked.map_or(true, |id| id == job_id) =>
                {
                    return Some(CompletionSignal::ViewDownloadsRequested);
                }
                QueueEvent::Progress { job_id: id, downloaded, total } if id == job_id => {
                    if let Some(observer) = self.progress_observer.as_mut() {
                        observer(id, Progress { downloaded, total });
                    }
                }
                _ => {}
            }
        }
        None
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for CompletionSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// 更新流程所依赖的下载服务
#[async_trait(?Send)]
pub trait TransferService {
    /// 加入新的下载任务，只在服务不可用时失败
    async fn start(&self, request: DownloadRequest) -> UpdateResult<JobId>;

    /// 当前状态，任务不存在时为 `Unknown`
    async fn status(&self, job_id: JobId) -> UpdateResult<DownloadStatus>;

    /// 只有状态为 `Succeeded` 且文件仍在时才有值
    async fn resolved_location(&self, job_id: JobId) -> UpdateResult<Option<ArtifactLocation>>;

    /// 任务的保存路径，不论是否完成
    async fn save_path(&self, job_id: JobId) -> UpdateResult<Option<PathBuf>>;

    /// 字节进度，未知时均为 0
    async fn progress(&self, job_id: JobId) -> UpdateResult<Progress>;

    /// 移除任务记录和文件，可重复调用
    async fn cancel_and_discard(&self, job_id: JobId) -> UpdateResult<()>;

    async fn subscribe_on_completion(&self) -> UpdateResult<CompletionSubscription>;
}

/// 基于 `DownloadQueueActor` 的下载跟踪器
#[derive(Clone)]
pub struct TransferTracker {
    queue: Addr<DownloadQueueActor>,
}

impl TransferTracker {
    pub fn new(queue: Addr<DownloadQueueActor>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Addr<DownloadQueueActor> {
        &self.queue
    }

    async fn query(&self, job_id: JobId) -> UpdateResult<Option<crate::core::queue::JobRecord>> {
        Ok(self.queue.send(QueryJob { job_id }).await?)
    }
}

#[async_trait(?Send)]
impl TransferService for TransferTracker {
    async fn start(&self, request: DownloadRequest) -> UpdateResult<JobId> {
        self.queue.send(Enqueue(request)).await?
    }

    async fn status(&self, job_id: JobId) -> UpdateResult<DownloadStatus> {
        Ok(self.query(job_id).await?.map_or(DownloadStatus::Unknown, |job| job.status()))
    }

    async fn resolved_location(&self, job_id: JobId) -> UpdateResult<Option<ArtifactLocation>> {
        let location = self.query(job_id).await?
            .filter(|job| job.status() == DownloadStatus::Succeeded && job.save_path.is_file())
            .map(|job| ArtifactLocation::new(job.save_path));
        Ok(location)
    }

    async fn save_path(&self, job_id: JobId) -> UpdateResult<Option<PathBuf>> {
        Ok(self.query(job_id).await?.map(|job| job.save_path))
    }

    async fn progress(&self, job_id: JobId) -> UpdateResult<Progress> {
        Ok(self.query(job_id).await?.map(|job| job.progress()).unwrap_or_default())
    }

    async fn cancel_and_discard(&self, job_id: JobId) -> UpdateResult<()> {
        let existed = self.queue.send(RemoveJob { job_id }).await??;
        if !existed {
            log::debug!("任务 {} 已不存在，无需丢弃", job_id);
        }
        Ok(())
    }

    async fn subscribe_on_completion(&self) -> UpdateResult<CompletionSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription_id = self.queue.send(Subscribe { sender: tx }).await?;
        let queue = self.queue.clone();
        Ok(CompletionSubscription::new(rx, move || {
            queue.do_send(Unsubscribe(subscription_id));
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::UpdateError;
    use crate::core::queue::{QueueSettings, RetryStrategy};
    use actix::Actor;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    fn tracker(dir: &std::path::Path) -> TransferTracker {
        let settings = QueueSettings {
            download_dir: dir.join("downloads"),
            state_path: None,
            user_agent: "apkup-test".to_string(),
            timeout: Duration::from_secs(5),
            speed_limit_kb: 0,
            retry: RetryStrategy { max_retries: 0, ..RetryStrategy::default() },
            auto_resume_on_startup: false,
        };
        TransferTracker::new(DownloadQueueActor::new(settings).start())
    }

    #[actix_rt::test]
    async fn test_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        let job = JobId::new(42).unwrap();

        assert_eq!(tracker.status(job).await.unwrap(), DownloadStatus::Unknown);
        assert_eq!(tracker.resolved_location(job).await.unwrap(), None);
        assert_eq!(tracker.progress(job).await.unwrap(), Progress::default());
        // 丢弃不存在的任务不报错，重复调用结果一致
        tracker.cancel_and_discard(job).await.unwrap();
        tracker.cancel_and_discard(job).await.unwrap();
    }

    #[actix_rt::test]
    async fn test_download_and_completion_signal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/app.apk")
            .with_status(200)
            .with_body("apk-bytes")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        let progressed = Rc::new(Cell::new(false));
        let flag = progressed.clone();
        let mut subscription = tracker.subscribe_on_completion().await.unwrap()
            .on_progress(move |_, _| flag.set(true));

        let job = tracker.start(DownloadRequest {
            source_url: format!("{}/app.apk", server.url()),
            title: "更新".to_string(),
            target_name: "app.apk".to_string(),
        }).await.unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(10), subscription.next_signal(job))
            .await
            .unwrap();
        assert_eq!(signal, Some(CompletionSignal::Completed { job_id: job, status: DownloadStatus::Succeeded }));
        assert!(progressed.get());

        let location = tracker.resolved_location(job).await.unwrap().unwrap();
        assert_eq!(location.file_name().as_deref(), Some("app.apk"));
        assert_eq!(location.file_uri().unwrap().scheme(), "file");
        assert_eq!(tracker.progress(job).await.unwrap(), Progress { downloaded: 9, total: 9 });

        tracker.cancel_and_discard(job).await.unwrap();
        assert!(!location.path.exists());
        assert_eq!(tracker.status(job).await.unwrap(), DownloadStatus::Unknown);
    }

    #[actix_rt::test]
    async fn test_subscription_released_once_on_drop() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let subscription = CompletionSubscription::new(rx, move || counter.set(counter.get() + 1));
        subscription.unsubscribe();
        assert_eq!(calls.get(), 1);
    }

    #[actix_rt::test]
    async fn test_notification_click_for_other_job_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = CompletionSubscription::new(rx, || {});
        let job = JobId::new(1).unwrap();
        let other = JobId::new(2).unwrap();

        tx.send(QueueEvent::NotificationClicked { job_id: Some(other) }).unwrap();
        tx.send(QueueEvent::Completed { job_id: other, status: DownloadStatus::Succeeded }).unwrap();
        tx.send(QueueEvent::NotificationClicked { job_id: Some(job) }).unwrap();
        assert_eq!(subscription.next_signal(job).await, Some(CompletionSignal::ViewDownloadsRequested));

        drop(tx);
        assert_eq!(subscription.next_signal(job).await, None);
    }

    #[actix_rt::test]
    async fn test_dead_service_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        tracker.queue().do_send(StopQueue);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = tracker.status(JobId::new(1).unwrap()).await.unwrap_err();
        assert!(matches!(err, UpdateError::ServiceUnavailable(_)));
    }

    struct StopQueue;
    impl actix::Message for StopQueue { type Result = (); }
    impl actix::Handler<StopQueue> for DownloadQueueActor {
        type Result = ();
        fn handle(&mut self, _msg: StopQueue, ctx: &mut Self::Context) {
            use actix::ActorContext;
            ctx.stop();
        }
    }
}
