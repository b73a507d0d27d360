//! 更新流程
//!
//! 一次检查的步骤：
//! 1. 读取上次的下载任务 id，没有则重新下载
//! 2. 上次已下载成功且是新版本时直接复用，否则丢弃后重新下载
//! 3. 上次下载失败或已不存在时删除残留文件后重新下载
//! 4. 上次下载仍在进行时等待它完成
//! 5. 下载完成后申请安装权限，获得授权后派发安装请求

use std::cell::Cell;
use std::fmt;
use std::fs;
use std::rc::Rc;

use crate::core::error::{UpdateError, UpdateResult};
use crate::core::prefs::Preferences;
use crate::core::queue::{DownloadRequest, DownloadStatus, JobId, Progress};
use crate::core::tracker::{CompletionSignal, CompletionSubscription, TransferService};
use super::gate::{GateOutcome, InstallPermissionGate};
use super::install::{AddressingStrategy, InstallLauncher};
use super::version::{is_update_newer, InstalledPackages, PackageInspector};

/// 拒绝授权时给用户的提示
pub const PERMISSION_DENIED_NOTICE: &str = "安装未授权";
pub const DOWNLOAD_FAILED_NOTICE: &str = "更新包下载失败，请稍后重试";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    CheckExisting,
    ReuseArtifact,
    DiscardAndRedownload,
    FreshDownload,
    AwaitingDownload,
    PermissionCheck,
    Installing,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// 已把安装请求交给平台
    InstallDispatched { job_id: JobId, uri: String, reused: bool },
    PermissionDenied,
    /// 权限申请被另一次申请取代
    PermissionSuperseded,
    DownloadFailed { job_id: JobId, status: DownloadStatus },
    /// 已有一次检查正在进行
    AlreadyRunning,
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::InstallDispatched { job_id, uri, reused } => {
                let source = if *reused { "已有安装包" } else { "新下载的安装包" };
                write!(f, "已发起安装 ({} {}): {}", source, job_id, uri)
            }
            UpdateOutcome::PermissionDenied => write!(f, "{}", PERMISSION_DENIED_NOTICE),
            UpdateOutcome::PermissionSuperseded => write!(f, "权限申请已被取代"),
            UpdateOutcome::DownloadFailed { job_id, status } => {
                write!(f, "下载任务 {} 未成功: {}", job_id, status)
            }
            UpdateOutcome::AlreadyRunning => write!(f, "更新检查正在进行中"),
        }
    }
}

/// 面向用户的提示
pub trait UpdateNotifier {
    fn notice(&self, message: &str);
}

/// 更新流程依赖的服务
pub struct UpdateServices {
    pub tracker: Rc<dyn TransferService>,
    pub prefs: Rc<Preferences>,
    pub inspector: Rc<dyn PackageInspector>,
    pub installed: Rc<dyn InstalledPackages>,
    pub gate: Rc<InstallPermissionGate>,
    pub launcher: Rc<dyn InstallLauncher>,
    pub notifier: Rc<dyn UpdateNotifier>,
}

/// 要更新的目标
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub request: DownloadRequest,
    pub package_id: String,
    pub strategy: AddressingStrategy,
}

enum ExistingJob {
    Reuse(JobId),
    Await(JobId),
}

/// 进行中标志，离开作用域时复位
struct FlightGuard<'a>(&'a Cell<bool>);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

type ProgressObserver = Rc<dyn Fn(JobId, Progress)>;

pub struct UpdateOrchestrator {
    services: UpdateServices,
    plan: UpdatePlan,
    state: Cell<UpdateState>,
    in_flight: Cell<bool>,
    progress_observer: Option<ProgressObserver>,
}

impl UpdateOrchestrator {
    pub fn new(services: UpdateServices, plan: UpdatePlan) -> Self {
        Self {
            services,
            plan,
            state: Cell::new(UpdateState::Idle),
            in_flight: Cell::new(false),
            progress_observer: None,
        }
    }

    /// 等待下载时的进度回调
    pub fn with_progress(mut self, observer: impl Fn(JobId, Progress) + 'static) -> Self {
        self.progress_observer = Some(Rc::new(observer));
        self
    }

    pub fn state(&self) -> UpdateState {
        self.state.get()
    }

    /// 执行一次更新检查
    pub async fn run(&self) -> UpdateResult<UpdateOutcome> {
        if self.in_flight.replace(true) {
            log::warn!("更新检查正在进行中，忽略本次调用");
            return Ok(UpdateOutcome::AlreadyRunning);
        }
        let _guard = FlightGuard(&self.in_flight);

        let result = self.run_flow().await;
        if let Err(e) = &result {
            log::error!("更新流程失败 ({:?}): {}", e.failure_class(), e);
        }
        self.set_state(UpdateState::Terminal);
        result
    }

    fn set_state(&self, state: UpdateState) {
        let previous = self.state.replace(state);
        if previous != state {
            log::debug!("更新状态: {:?} -> {:?}", previous, state);
        }
    }

    async fn run_flow(&self) -> UpdateResult<UpdateOutcome> {
        self.set_state(UpdateState::CheckExisting);
        // 先订阅再查询，避免错过完成通知
        let mut subscription = self.subscribe().await?;

        let job_id = match self.check_existing().await? {
            ExistingJob::Reuse(job_id) => {
                drop(subscription);
                self.set_state(UpdateState::ReuseArtifact);
                return self.install(job_id, true).await;
            }
            ExistingJob::Await(job_id) => job_id,
        };

        self.set_state(UpdateState::AwaitingDownload);
        loop {
            match subscription.next_signal(job_id).await {
                Some(CompletionSignal::Completed { status: DownloadStatus::Succeeded, .. }) => break,
                Some(CompletionSignal::Completed { status, .. }) => {
                    log::error!("下载任务 {} 结束但未成功: {}", job_id, status);
                    self.services.notifier.notice(DOWNLOAD_FAILED_NOTICE);
                    return Ok(UpdateOutcome::DownloadFailed { job_id, status });
                }
                Some(CompletionSignal::ViewDownloadsRequested) => {
                    if let Err(e) = self.services.launcher.view_downloads() {
                        log::warn!("打开下载列表失败: {}", e);
                    }
                }
                None => {
                    return Err(UpdateError::ServiceUnavailable("下载服务已停止".to_string()));
                }
            }
        }
        drop(subscription);
        self.install(job_id, false).await
    }

    async fn subscribe(&self) -> UpdateResult<CompletionSubscription> {
        let subscription = self.services.tracker.subscribe_on_completion().await?;
        Ok(match &self.progress_observer {
            Some(observer) => {
                let observer = observer.clone();
                subscription.on_progress(move |job_id, progress| observer(job_id, progress))
            }
            None => subscription,
        })
    }

    async fn check_existing(&self) -> UpdateResult<ExistingJob> {
        let Some(job_id) = self.services.prefs.last_download_job() else {
            log::info!("没有上次的下载记录");
            return self.fresh_download().await.map(ExistingJob::Await);
        };

        let status = self.services.tracker.status(job_id).await?;
        log::info!("上次下载任务 {}: {}", job_id, status);
        match status {
            DownloadStatus::Succeeded => {
                if self.artifact_qualifies(job_id).await? {
                    return Ok(ExistingJob::Reuse(job_id));
                }
                self.set_state(UpdateState::DiscardAndRedownload);
                self.discard(job_id).await?;
            }
            DownloadStatus::Failed | DownloadStatus::Unknown => {
                self.discard(job_id).await?;
            }
            DownloadStatus::Pending | DownloadStatus::Running | DownloadStatus::Paused => {
                log::info!("等待下载任务 {} 完成", job_id);
                return Ok(ExistingJob::Await(job_id));
            }
        }
        self.fresh_download().await.map(ExistingJob::Await)
    }

    /// 已下载的安装包是否可以直接安装，读不出版本信息时视为不可用
    async fn artifact_qualifies(&self, job_id: JobId) -> UpdateResult<bool> {
        let Some(location) = self.services.tracker.resolved_location(job_id).await? else {
            log::warn!("下载任务 {} 的文件已不存在", job_id);
            return Ok(false);
        };
        let candidate = match self.services.inspector.inspect(&location.path) {
            Ok(info) => info,
            Err(e) => {
                log::warn!("无法读取安装包信息，将重新下载: {}", e);
                return Ok(false);
            }
        };
        let current = self.services.installed.lookup(&self.plan.package_id);
        let newer = is_update_newer(&candidate, current.as_ref());
        log::info!(
            "已下载 {}，当前安装 {}，{}",
            candidate,
            current.as_ref().map_or("未知".to_string(), |c| c.to_string()),
            if newer { "可直接安装" } else { "需要重新下载" }
        );
        Ok(newer)
    }

    /// 丢弃任务并确保磁盘上的文件已删除
    async fn discard(&self, job_id: JobId) -> UpdateResult<()> {
        let save_path = self.services.tracker.save_path(job_id).await?;
        self.services.tracker.cancel_and_discard(job_id).await?;
        if let Some(path) = save_path.filter(|path| path.exists()) {
            fs::remove_file(&path)?;
            log::info!("已删除残留文件 {:?}", path);
        }
        self.services.prefs.clear_last_download_job()?;
        Ok(())
    }

    async fn fresh_download(&self) -> UpdateResult<JobId> {
        self.set_state(UpdateState::FreshDownload);
        let job_id = self.services.tracker.start(self.plan.request.clone()).await?;
        self.services.prefs.set_last_download_job(job_id)?;
        log::info!("开始下载 {} -> {}", self.plan.request.source_url, job_id);
        Ok(job_id)
    }

    async fn install(&self, job_id: JobId, reused: bool) -> UpdateResult<UpdateOutcome> {
        self.set_state(UpdateState::PermissionCheck);
        match self.services.gate.request_permission().await {
            GateOutcome::Granted => {}
            GateOutcome::Denied => {
                self.services.notifier.notice(PERMISSION_DENIED_NOTICE);
                return Ok(UpdateOutcome::PermissionDenied);
            }
            GateOutcome::Superseded => return Ok(UpdateOutcome::PermissionSuperseded),
        }

        self.set_state(UpdateState::Installing);
        let location = self.services.tracker.resolved_location(job_id).await?
            .ok_or(UpdateError::JobNotFound(job_id))?;
        let intent = self.plan.strategy.build_intent(&location)?;
        self.services.launcher.dispatch(&intent)?;
        let uri = intent.data_uri.unwrap_or_default();
        log::info!("已派发安装请求: {}", uri);
        Ok(UpdateOutcome::InstallDispatched { job_id, uri, reused })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::QueueEvent;
    use crate::core::tracker::ArtifactLocation;
    use crate::update::apk::{fixture, ApkInspector};
    use crate::update::gate::fakes::{FixedPolicy, RecordingLauncher, ScriptedPrompt};
    use crate::update::gate::{GateState, PromptAnswer};
    use crate::update::install::{ACTION_VIEW, ACTION_VIEW_DOWNLOADS, APK_MIME_TYPE};
    use crate::update::version::{SelfPackage, VersionInfo};
    use async_trait::async_trait;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const PACKAGE: &str = "com.example.app";

    struct FakeJob {
        status: DownloadStatus,
        path: PathBuf,
    }

    /// 内存中的下载服务
    struct FakeTransfer {
        dir: PathBuf,
        jobs: RefCell<BTreeMap<JobId, FakeJob>>,
        next_id: Cell<u64>,
        started: RefCell<Vec<DownloadRequest>>,
        subscribers: RefCell<Vec<mpsc::UnboundedSender<QueueEvent>>>,
        unsubscribed: Rc<Cell<usize>>,
        /// start 后立即以这个状态结束，成功时写入对应版本号的安装包
        complete_on_start: Option<(DownloadStatus, i64)>,
    }

    impl FakeTransfer {
        fn new(dir: &Path, complete_on_start: Option<(DownloadStatus, i64)>) -> Rc<Self> {
            Rc::new(Self {
                dir: dir.to_path_buf(),
                jobs: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(100),
                started: RefCell::new(Vec::new()),
                subscribers: RefCell::new(Vec::new()),
                unsubscribed: Rc::new(Cell::new(0)),
                complete_on_start,
            })
        }

        fn allocate(&self) -> JobId {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            JobId::new(id).unwrap()
        }

        /// 加入一个已有任务，`version` 为 Some 时写入完整安装包，否则写入残缺文件
        fn insert(&self, status: DownloadStatus, version: Option<i64>) -> JobId {
            let job_id = self.allocate();
            let path = self.dir.join(format!("old-{}.apk", job_id.get()));
            match version {
                Some(version) => fixture::write_apk(&path, PACKAGE, version),
                None => fs::write(&path, b"partial").unwrap(),
            }
            self.jobs.borrow_mut().insert(job_id, FakeJob { status, path });
            job_id
        }

        fn broadcast(&self, event: QueueEvent) {
            self.subscribers.borrow_mut().retain(|tx| tx.send(event.clone()).is_ok());
        }

        fn complete(&self, job_id: JobId, status: DownloadStatus, version: i64) {
            if let Some(job) = self.jobs.borrow_mut().get_mut(&job_id) {
                if status == DownloadStatus::Succeeded {
                    fixture::write_apk(&job.path, PACKAGE, version);
                }
                job.status = status;
            }
            self.broadcast(QueueEvent::Completed { job_id, status });
        }
    }

    #[async_trait(?Send)]
    impl TransferService for FakeTransfer {
        async fn start(&self, request: DownloadRequest) -> UpdateResult<JobId> {
            let job_id = self.allocate();
            let path = self.dir.join(&request.target_name);
            self.started.borrow_mut().push(request);
            self.jobs.borrow_mut().insert(job_id, FakeJob { status: DownloadStatus::Running, path });
            if let Some((status, version)) = self.complete_on_start {
                self.complete(job_id, status, version);
            }
            Ok(job_id)
        }

        async fn status(&self, job_id: JobId) -> UpdateResult<DownloadStatus> {
            Ok(self.jobs.borrow().get(&job_id).map_or(DownloadStatus::Unknown, |job| job.status))
        }

        async fn resolved_location(&self, job_id: JobId) -> UpdateResult<Option<ArtifactLocation>> {
            Ok(self.jobs.borrow().get(&job_id)
                .filter(|job| job.status == DownloadStatus::Succeeded && job.path.is_file())
                .map(|job| ArtifactLocation::new(job.path.clone())))
        }

        async fn save_path(&self, job_id: JobId) -> UpdateResult<Option<PathBuf>> {
            Ok(self.jobs.borrow().get(&job_id).map(|job| job.path.clone()))
        }

        async fn progress(&self, _job_id: JobId) -> UpdateResult<Progress> {
            Ok(Progress::default())
        }

        async fn cancel_and_discard(&self, job_id: JobId) -> UpdateResult<()> {
            // 只删除记录，文件由调用方负责清理
            self.jobs.borrow_mut().remove(&job_id);
            Ok(())
        }

        async fn subscribe_on_completion(&self) -> UpdateResult<CompletionSubscription> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.borrow_mut().push(tx);
            let counter = self.unsubscribed.clone();
            Ok(CompletionSubscription::new(rx, move || counter.set(counter.get() + 1)))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: RefCell<Vec<String>>,
    }

    impl UpdateNotifier for RecordingNotifier {
        fn notice(&self, message: &str) {
            self.notices.borrow_mut().push(message.to_string());
        }
    }

    struct Harness {
        transfer: Rc<FakeTransfer>,
        prefs: Rc<Preferences>,
        gate: Rc<InstallPermissionGate>,
        launcher: Rc<RecordingLauncher>,
        notifier: Rc<RecordingNotifier>,
        orchestrator: UpdateOrchestrator,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn dispatched_actions(&self) -> Vec<String> {
            self.launcher.dispatched.borrow().iter().map(|intent| intent.action.clone()).collect()
        }
    }

    fn harness(
        installed_version: i64,
        complete_on_start: Option<(DownloadStatus, i64)>,
        policy: Rc<FixedPolicy>,
        prompt: Rc<ScriptedPrompt>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let transfer = FakeTransfer::new(dir.path(), complete_on_start);
        let prefs = Rc::new(Preferences::in_memory());
        let launcher = Rc::new(RecordingLauncher::default());
        let notifier = Rc::new(RecordingNotifier::default());
        let gate = Rc::new(InstallPermissionGate::new(policy, prompt, launcher.clone(), PACKAGE));

        let services = UpdateServices {
            tracker: transfer.clone(),
            prefs: prefs.clone(),
            inspector: Rc::new(ApkInspector::new()),
            installed: Rc::new(SelfPackage::new(Some(VersionInfo::new(PACKAGE, installed_version)))),
            gate: gate.clone(),
            launcher: launcher.clone(),
            notifier: notifier.clone(),
        };
        let plan = UpdatePlan {
            request: DownloadRequest {
                source_url: "https://example.com/app.apk".to_string(),
                title: "应用更新".to_string(),
                target_name: "update.apk".to_string(),
            },
            package_id: PACKAGE.to_string(),
            strategy: AddressingStrategy::DirectFile,
        };

        Harness {
            transfer,
            prefs,
            gate,
            launcher,
            notifier,
            orchestrator: UpdateOrchestrator::new(services, plan),
            _dir: dir,
        }
    }

    fn granting() -> (Rc<FixedPolicy>, Rc<ScriptedPrompt>) {
        (FixedPolicy::new(false, false), ScriptedPrompt::new(&[], &[]))
    }

    #[actix_rt::test]
    async fn test_fresh_download_when_no_previous_job() {
        let (policy, prompt) = granting();
        let h = harness(3, Some((DownloadStatus::Succeeded, 5)), policy, prompt);

        let outcome = h.orchestrator.run().await.unwrap();

        assert_eq!(h.transfer.started.borrow().len(), 1);
        let job_id = h.prefs.last_download_job().expect("新任务 id 应已保存");
        match outcome {
            UpdateOutcome::InstallDispatched { job_id: installed, uri, reused } => {
                assert_eq!(installed, job_id);
                assert!(!reused);
                assert!(uri.starts_with("file://") && uri.ends_with("update.apk"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let dispatched = h.launcher.dispatched.borrow();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].mime_type.as_deref(), Some(APK_MIME_TYPE));
        assert_eq!(h.orchestrator.state(), UpdateState::Terminal);
        assert_eq!(h.transfer.unsubscribed.get(), 1);
    }

    #[actix_rt::test]
    async fn test_reuse_newer_artifact() {
        let (policy, prompt) = granting();
        let h = harness(3, None, policy, prompt);
        let job_id = h.transfer.insert(DownloadStatus::Succeeded, Some(5));
        h.prefs.set_last_download_job(job_id).unwrap();

        let outcome = h.orchestrator.run().await.unwrap();

        assert!(h.transfer.started.borrow().is_empty());
        assert!(matches!(outcome, UpdateOutcome::InstallDispatched { reused: true, job_id: id, .. } if id == job_id));
        assert_eq!(h.dispatched_actions(), vec![ACTION_VIEW]);
        assert_eq!(h.prefs.last_download_job(), Some(job_id));
    }

    #[actix_rt::test]
    async fn test_discard_older_artifact_and_redownload() {
        let (policy, prompt) = granting();
        let h = harness(5, Some((DownloadStatus::Succeeded, 6)), policy, prompt);
        let old = h.transfer.insert(DownloadStatus::Succeeded, Some(3));
        let old_path = h.transfer.jobs.borrow()[&old].path.clone();
        h.prefs.set_last_download_job(old).unwrap();

        let outcome = h.orchestrator.run().await.unwrap();

        assert!(!old_path.exists());
        assert!(!h.transfer.jobs.borrow().contains_key(&old));
        assert_eq!(h.transfer.started.borrow().len(), 1);
        let new_job = h.prefs.last_download_job().unwrap();
        assert_ne!(new_job, old);
        assert!(matches!(outcome, UpdateOutcome::InstallDispatched { reused: false, .. }));
    }

    #[actix_rt::test]
    async fn test_unreadable_artifact_is_redownloaded() {
        let (policy, prompt) = granting();
        let h = harness(3, Some((DownloadStatus::Succeeded, 5)), policy, prompt);
        let old = h.transfer.insert(DownloadStatus::Succeeded, None);
        h.prefs.set_last_download_job(old).unwrap();

        h.orchestrator.run().await.unwrap();

        assert_eq!(h.transfer.started.borrow().len(), 1);
        assert!(h.notifier.notices.borrow().is_empty());
    }

    #[actix_rt::test]
    async fn test_failed_job_removes_partial_file() {
        let (policy, prompt) = granting();
        let h = harness(3, Some((DownloadStatus::Succeeded, 5)), policy, prompt);
        let old = h.transfer.insert(DownloadStatus::Failed, None);
        let partial = h.transfer.jobs.borrow()[&old].path.clone();
        h.prefs.set_last_download_job(old).unwrap();

        h.orchestrator.run().await.unwrap();

        assert!(!partial.exists());
        assert_eq!(h.transfer.started.borrow().len(), 1);
        assert_ne!(h.prefs.last_download_job(), Some(old));
    }

    #[actix_rt::test]
    async fn test_denied_permission_shows_notice() {
        let policy = FixedPolicy::new(true, false);
        let prompt = ScriptedPrompt::new(&[PromptAnswer::Cancel], &[]);
        let h = harness(3, None, policy, prompt.clone());
        let job_id = h.transfer.insert(DownloadStatus::Succeeded, Some(5));
        h.prefs.set_last_download_job(job_id).unwrap();

        let outcome = h.orchestrator.run().await.unwrap();

        assert_eq!(outcome, UpdateOutcome::PermissionDenied);
        assert_eq!(prompt.asked.borrow().len(), 1);
        assert_eq!(*h.notifier.notices.borrow(), vec![PERMISSION_DENIED_NOTICE.to_string()]);
        assert!(h.launcher.dispatched.borrow().is_empty());
        assert_eq!(h.gate.state(), GateState::Idle);
    }

    #[actix_rt::test]
    async fn test_waits_for_running_job() {
        let (policy, prompt) = granting();
        let h = harness(3, None, policy, prompt);
        let job_id = h.transfer.insert(DownloadStatus::Running, None);
        h.prefs.set_last_download_job(job_id).unwrap();

        let driver = async {
            tokio::task::yield_now().await;
            assert_eq!(h.orchestrator.state(), UpdateState::AwaitingDownload);
            h.transfer.broadcast(QueueEvent::NotificationClicked { job_id: Some(job_id) });
            h.transfer.complete(job_id, DownloadStatus::Succeeded, 5);
        };
        let (outcome, _) = tokio::join!(h.orchestrator.run(), driver);

        assert!(h.transfer.started.borrow().is_empty());
        assert!(matches!(outcome.unwrap(), UpdateOutcome::InstallDispatched { reused: false, .. }));
        assert_eq!(h.dispatched_actions(), vec![ACTION_VIEW_DOWNLOADS, ACTION_VIEW]);
    }

    #[actix_rt::test]
    async fn test_failed_download_ends_attempt() {
        let (policy, prompt) = granting();
        let h = harness(3, Some((DownloadStatus::Failed, 0)), policy, prompt);

        let outcome = h.orchestrator.run().await.unwrap();

        assert!(matches!(outcome, UpdateOutcome::DownloadFailed { status: DownloadStatus::Failed, .. }));
        assert_eq!(*h.notifier.notices.borrow(), vec![DOWNLOAD_FAILED_NOTICE.to_string()]);
        assert!(h.launcher.dispatched.borrow().is_empty());
        // 失败的任务 id 仍然保存，下次检查时清理
        assert!(h.prefs.last_download_job().is_some());
    }

    #[actix_rt::test]
    async fn test_concurrent_run_is_rejected() {
        let (policy, prompt) = granting();
        let h = harness(3, None, policy, prompt);

        let first = tokio::time::timeout(Duration::from_millis(100), h.orchestrator.run());
        let second = async {
            tokio::task::yield_now().await;
            h.orchestrator.run().await
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_err());
        assert_eq!(second.unwrap(), UpdateOutcome::AlreadyRunning);

        // 第一次被放弃后可以重新检查
        let job_id = h.prefs.last_download_job().unwrap();
        let retry = async {
            tokio::task::yield_now().await;
            h.transfer.complete(job_id, DownloadStatus::Succeeded, 5);
        };
        let (outcome, _) = tokio::join!(h.orchestrator.run(), retry);
        assert!(matches!(outcome.unwrap(), UpdateOutcome::InstallDispatched { .. }));
    }

    #[actix_rt::test]
    async fn test_service_shutdown_is_reported() {
        let (policy, prompt) = granting();
        let h = harness(3, None, policy, prompt);

        let driver = async {
            tokio::task::yield_now().await;
            h.transfer.subscribers.borrow_mut().clear();
        };
        let (outcome, _) = tokio::join!(h.orchestrator.run(), driver);

        assert!(matches!(outcome, Err(UpdateError::ServiceUnavailable(_))));
        assert_eq!(h.orchestrator.state(), UpdateState::Terminal);
    }
}
