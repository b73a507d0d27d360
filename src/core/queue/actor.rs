use actix::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::config::Config;
use super::messages::{QueueEvent, TransferFinished};
use super::retry::RetryStrategy;
use super::state::{JobId, JobRecord, JobState};
use super::transfer::{run_with_retry, TransferControl, TransferSpec};

/// 队列设置，从 `Config` 中取出
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub download_dir: PathBuf,
    /// None 表示不持久化
    pub state_path: Option<PathBuf>,
    pub user_agent: String,
    pub timeout: Duration,
    pub speed_limit_kb: u64,
    pub retry: RetryStrategy,
    pub auto_resume_on_startup: bool,
}

impl QueueSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            download_dir: PathBuf::from(&config.download_dir),
            state_path: Some(config.queue_state_path()),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.timeout),
            speed_limit_kb: config.speed_limit_kb,
            retry: config.retry_strategy(),
            auto_resume_on_startup: config.auto_resume_on_startup,
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct QueueState {
    next_id: u64,
    jobs: Vec<JobRecord>,
}

/// 下载队列服务 Actor
///
/// 负责排队、传输、重试和进度记录，任务记录落盘后可以在下一个进程中继续查询。
pub struct DownloadQueueActor {
    pub(super) settings: QueueSettings,
    pub(super) jobs: BTreeMap<JobId, JobRecord>,
    pub(super) active: HashMap<JobId, TransferControl>,
    pub(super) subscribers: HashMap<Uuid, UnboundedSender<QueueEvent>>,
    pub(super) next_id: u64,
}

impl Actor for DownloadQueueActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if !self.settings.auto_resume_on_startup {
            return;
        }
        let pending: Vec<JobId> = self.jobs.values()
            .filter(|job| job.state == JobState::Pending)
            .map(|job| job.id)
            .collect();
        for job_id in pending {
            log::info!("恢复未完成的下载 {}", job_id);
            self.spawn_transfer(job_id, ctx);
        }
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        for control in self.active.values() {
            control.cancel();
        }
        self.save_state();
        Running::Stop
    }
}

impl DownloadQueueActor {
    pub fn new(settings: QueueSettings) -> Self {
        let mut queue = Self {
            settings,
            jobs: BTreeMap::new(),
            active: HashMap::new(),
            subscribers: HashMap::new(),
            next_id: 1,
        };
        queue.load_state();
        queue
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(QueueSettings::from_config(config))
    }

    pub(super) fn allocate_id(&mut self) -> JobId {
        loop {
            let raw = self.next_id;
            self.next_id += 1;
            if let Some(id) = JobId::new(raw) {
                if !self.jobs.contains_key(&id) {
                    return id;
                }
            }
        }
    }

    fn load_state(&mut self) {
        let Some(path) = &self.settings.state_path else { return };
        let Ok(data) = fs::read_to_string(path) else { return };
        let state: QueueState = match serde_json::from_str(&data) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("下载队列状态损坏，将忽略: {}", e);
                return;
            }
        };
        for mut job in state.jobs {
            // 上个进程退出时仍在传输的任务
            if job.state == JobState::Running {
                job.state = if self.settings.auto_resume_on_startup {
                    JobState::Pending
                } else {
                    JobState::Paused
                };
            }
            self.jobs.insert(job.id, job);
        }
        let max_id = self.jobs.keys().map(|id| id.get()).max().unwrap_or(0);
        self.next_id = state.next_id.max(max_id + 1);
    }

    pub(super) fn save_state(&self) {
        let Some(path) = &self.settings.state_path else { return };
        let state = QueueState {
            next_id: self.next_id,
            jobs: self.jobs.values().cloned().collect(),
        };
        let result = serde_json::to_string_pretty(&state)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(path, json).map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            log::error!("保存下载队列状态失败: {}", e);
        }
    }

    pub(super) fn broadcast(&mut self, event: QueueEvent) {
        // 接收端已关闭的订阅者直接清理
        self.subscribers.retain(|_, sender| sender.send(event.clone()).is_ok());
    }

    pub(super) fn spawn_transfer(&mut self, job_id: JobId, ctx: &mut Context<Self>) {
        let Some(job) = self.jobs.get_mut(&job_id) else { return };
        job.state = JobState::Running;
        job.bytes_downloaded = 0;

        let control = TransferControl::default();
        let spec = TransferSpec {
            job_id,
            url: job.source_url.clone(),
            save_path: job.save_path.clone(),
            user_agent: self.settings.user_agent.clone(),
            timeout: self.settings.timeout,
            speed_limit_kb: self.settings.speed_limit_kb,
            retry: self.settings.retry.clone(),
        };
        if let Some(old) = self.active.insert(job_id, control.clone()) {
            old.cancel();
        }
        self.save_state();

        let addr = ctx.address();
        let progress = addr.clone().recipient();
        actix::spawn(async move {
            let result = run_with_retry(spec, control, progress).await;
            addr.do_send(TransferFinished { job_id, result });
        });
    }
}
