use actix::prelude::*;
use chrono::Utc;
use std::io::ErrorKind;
use uuid::Uuid;

use crate::core::error::UpdateError;
use crate::utils::validator;
use super::actor::DownloadQueueActor;
use super::messages::*;
use super::state::{JobId, JobRecord, JobState};
use super::transfer::partial_path;

impl Handler<Enqueue> for DownloadQueueActor {
    type Result = Result<JobId, UpdateError>;
    fn handle(&mut self, msg: Enqueue, ctx: &mut Self::Context) -> Self::Result {
        let request = msg.0;
        validator::validate_download_url(&request.source_url)?;
        validator::validate_target_name(&request.target_name)?;

        std::fs::create_dir_all(&self.settings.download_dir)?;
        let save_path = self.settings.download_dir.join(&request.target_name);

        // 同一路径上仍在传输的旧任务会被取代
        let superseded: Vec<JobId> = self.jobs.values()
            .filter(|job| job.save_path == save_path && job.status().is_in_progress())
            .map(|job| job.id)
            .collect();
        for job_id in superseded {
            if let Some(control) = self.active.remove(&job_id) {
                control.cancel();
            }
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.state = JobState::Failed("被新的下载任务取代".to_string());
                job.finished_at = Some(Utc::now());
            }
            log::warn!("下载任务 {} 被新任务取代", job_id);
        }

        match std::fs::remove_file(&save_path) {
            Ok(()) => log::info!("删除旧文件 {:?}", save_path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let id = self.allocate_id();
        self.jobs.insert(id, JobRecord {
            id,
            source_url: request.source_url,
            title: request.title,
            target_name: request.target_name,
            save_path,
            state: JobState::Pending,
            bytes_downloaded: 0,
            total_bytes: 0,
            created_at: Utc::now(),
            finished_at: None,
        });
        log::info!("加入下载队列 {}", id);
        self.spawn_transfer(id, ctx);
        Ok(id)
    }
}

impl Handler<QueryJob> for DownloadQueueActor {
    type Result = Option<JobRecord>;
    fn handle(&mut self, msg: QueryJob, _ctx: &mut Self::Context) -> Self::Result {
        self.jobs.get(&msg.job_id).cloned()
    }
}

impl Handler<ListJobs> for DownloadQueueActor {
    type Result = MessageResult<ListJobs>;
    fn handle(&mut self, _msg: ListJobs, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.jobs.values().cloned().collect())
    }
}

impl Handler<PauseJob> for DownloadQueueActor {
    type Result = Result<(), UpdateError>;
    fn handle(&mut self, msg: PauseJob, _ctx: &mut Self::Context) -> Self::Result {
        let job = self.jobs.get_mut(&msg.job_id).ok_or(UpdateError::JobNotFound(msg.job_id))?;
        if !job.status().is_in_progress() {
            return Ok(());
        }
        if let Some(control) = self.active.get(&msg.job_id) {
            control.pause();
        }
        job.state = JobState::Paused;
        self.save_state();
        Ok(())
    }
}

impl Handler<ResumeJob> for DownloadQueueActor {
    type Result = Result<(), UpdateError>;
    fn handle(&mut self, msg: ResumeJob, ctx: &mut Self::Context) -> Self::Result {
        let job = self.jobs.get_mut(&msg.job_id).ok_or(UpdateError::JobNotFound(msg.job_id))?;
        if job.state != JobState::Paused {
            return Ok(());
        }
        match self.active.get(&msg.job_id) {
            Some(control) => {
                control.resume();
                job.state = JobState::Running;
                self.save_state();
            }
            // 上个进程留下的暂停任务，没有正在进行的传输
            None => self.spawn_transfer(msg.job_id, ctx),
        }
        Ok(())
    }
}

impl Handler<RemoveJob> for DownloadQueueActor {
    type Result = Result<bool, UpdateError>;
    fn handle(&mut self, msg: RemoveJob, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(control) = self.active.remove(&msg.job_id) {
            control.cancel();
        }
        let Some(job) = self.jobs.remove(&msg.job_id) else {
            return Ok(false);
        };
        self.save_state();
        for path in [partial_path(&job.save_path, job.id), job.save_path.clone()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        log::info!("移除下载任务 {} 及文件 {:?}", msg.job_id, job.save_path);
        Ok(true)
    }
}

impl Handler<Subscribe> for DownloadQueueActor {
    type Result = MessageResult<Subscribe>;
    fn handle(&mut self, msg: Subscribe, _ctx: &mut Self::Context) -> Self::Result {
        let id = Uuid::new_v4();
        self.subscribers.insert(id, msg.sender);
        MessageResult(id)
    }
}

impl Handler<Unsubscribe> for DownloadQueueActor {
    type Result = ();
    fn handle(&mut self, msg: Unsubscribe, _ctx: &mut Self::Context) {
        self.subscribers.remove(&msg.0);
    }
}

impl Handler<NotificationClicked> for DownloadQueueActor {
    type Result = ();
    fn handle(&mut self, msg: NotificationClicked, _ctx: &mut Self::Context) {
        self.broadcast(QueueEvent::NotificationClicked { job_id: msg.job_id });
    }
}

impl Handler<TransferProgress> for DownloadQueueActor {
    type Result = ();
    fn handle(&mut self, msg: TransferProgress, _ctx: &mut Self::Context) {
        if !self.active.contains_key(&msg.job_id) {
            return;
        }
        if let Some(job) = self.jobs.get_mut(&msg.job_id) {
            job.bytes_downloaded = msg.downloaded;
            job.total_bytes = msg.total;
            self.broadcast(QueueEvent::Progress {
                job_id: msg.job_id,
                downloaded: msg.downloaded,
                total: msg.total,
            });
        }
    }
}

impl Handler<TransferFinished> for DownloadQueueActor {
    type Result = ();
    fn handle(&mut self, msg: TransferFinished, _ctx: &mut Self::Context) {
        // 被取消的传输已经由取消方处理了任务状态
        if let Err(UpdateError::Cancelled) = msg.result {
            if self.active.get(&msg.job_id).map_or(false, |c| c.is_cancelled()) {
                self.active.remove(&msg.job_id);
            }
            return;
        }
        self.active.remove(&msg.job_id);
        let Some(job) = self.jobs.get_mut(&msg.job_id) else { return };

        match msg.result {
            Ok(written) => {
                job.state = JobState::Succeeded;
                job.bytes_downloaded = written;
                if job.total_bytes == 0 {
                    job.total_bytes = written;
                }
            }
            Err(e) => {
                job.state = JobState::Failed(e.to_string());
            }
        }
        job.finished_at = Some(Utc::now());
        let status = job.status();
        self.save_state();
        self.broadcast(QueueEvent::Completed { job_id: msg.job_id, status });
    }
}
