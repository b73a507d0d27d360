use actix::prelude::*;
use anyhow::Context as _;
use apkup::cli;
use apkup::config::Config;
use apkup::core::prefs::Preferences;
use apkup::core::queue::{DownloadQueueActor, DownloadRequest, DownloadStatus, ListJobs, PauseJob, QueryJob, ResumeJob};
use apkup::core::tracker::{TransferService, TransferTracker};
use apkup::ui::{self, ConsoleNotifier, JobSummary, ProgressManager, TerminalConsentPrompt};
use apkup::update::{
    ActivityManagerLauncher, AddressingStrategy, ApkInspector, DevicePolicy, InstallLauncher,
    InstallPermissionGate, SelfPackage, UpdateOrchestrator, UpdateOutcome, UpdatePlan, UpdateServices,
};
use apkup::utils::logger::{self, FlushLog, LoggerActor, LoggerExt};
use log::{Level, LevelFilter};
use std::path::Path;
use std::rc::Rc;

const LOG_FILE_MAX_SIZE: u64 = 10 * 1024 * 1024;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    logger::init_console(LevelFilter::Warn);

    // 解析参数和配置
    let (args, config) = match cli::Args::parse_args() {
        Ok((args, config)) => (args, config),
        Err(e) => {
            eprintln!("参数解析失败: {}", e);
            std::process::exit(1);
        }
    };

    let log_path = Path::new(&config.data_dir).join("logs").join("apkup.log");
    let logger = LoggerActor::new(&log_path, Level::Info, LOG_FILE_MAX_SIZE)
        .with_context(|| format!("无法打开日志文件 {:?}", log_path))?
        .start();
    logger.info(&format!(
        "程序启动 v{} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    ));
    logger.info(&format!("配置文件路径: {}", args.config));
    logger.info(&config.get_summary());

    let queue = DownloadQueueActor::from_config(&config).start();
    let tracker = TransferTracker::new(queue.clone());
    let prefs = Rc::new(Preferences::open(config.prefs_path()));

    let result = if args.status {
        show_status(&queue, &prefs).await
    } else if args.discard {
        discard_last_download(&tracker, &prefs, &logger).await
    } else {
        run_update(&config, &queue, tracker, prefs, &logger).await
    };

    if let Err(e) = &result {
        logger.error(&format!("{:#}", e));
    }
    logger.send(FlushLog).await.ok();
    result
}

/// 检查并安装更新
async fn run_update(
    config: &Config,
    queue: &Addr<DownloadQueueActor>,
    tracker: TransferTracker,
    prefs: Rc<Preferences>,
    logger: &Addr<LoggerActor>,
) -> anyhow::Result<()> {
    println!("{}", config.get_summary());

    let policy = Rc::new(DevicePolicy::from_config(config));
    let strategy = AddressingStrategy::select(policy.api_level(), &config.provider_authority)
        .context("无法确定安装包地址方式")?;
    logger.info(&format!("API 级别 {}，地址方式 {:?}", policy.api_level(), strategy));

    // 上个进程中断时暂停的下载
    if let Some(job_id) = prefs.last_download_job() {
        if tracker.status(job_id).await? == DownloadStatus::Paused {
            logger.info(&format!("继续下载任务 {}", job_id));
            queue.send(ResumeJob { job_id }).await??;
        }
    }

    let launcher: Rc<dyn InstallLauncher> = Rc::new(ActivityManagerLauncher::new(&config.launcher));
    let gate = InstallPermissionGate::new(
        policy,
        Rc::new(TerminalConsentPrompt::new()),
        launcher.clone(),
        &config.package_id,
    )
    .with_icon(config.app_icon.clone())
    .with_message(config.request_permission_message.clone());

    let services = UpdateServices {
        tracker: Rc::new(tracker),
        prefs: prefs.clone(),
        inspector: Rc::new(ApkInspector::new()),
        installed: Rc::new(SelfPackage::from_config(config)),
        gate: Rc::new(gate),
        launcher,
        notifier: Rc::new(ConsoleNotifier),
    };
    let plan = UpdatePlan {
        request: DownloadRequest {
            source_url: config.download_url.clone(),
            title: config.download_title.clone(),
            target_name: config.target_name(),
        },
        package_id: config.package_id.clone(),
        strategy,
    };

    let progress = Rc::new(ProgressManager::new(&config.download_title));
    let bar = progress.clone();
    let orchestrator = UpdateOrchestrator::new(services, plan)
        .with_progress(move |_, p| bar.update_progress(p.downloaded, p.total));

    let outcome = tokio::select! {
        outcome = orchestrator.run() => outcome,
        _ = tokio::signal::ctrl_c() => {
            // 暂停下载，下次启动时继续
            if let Some(job_id) = prefs.last_download_job() {
                queue.send(PauseJob { job_id }).await.ok();
            }
            progress.abandon("已中断");
            println!("\n用户中断，下载将在下次启动时继续");
            logger.warn("用户中断更新");
            return Ok(());
        }
    };

    match outcome {
        Ok(UpdateOutcome::InstallDispatched { reused, uri, job_id }) => {
            if !reused {
                progress.finish();
            }
            ui::print_success(&format!("已发起安装: {}", uri));
            logger.info(&format!("已发起安装 {} ({})", uri, job_id));
            Ok(())
        }
        Ok(UpdateOutcome::DownloadFailed { job_id, status }) => {
            progress.abandon("下载失败");
            logger.error(&format!("下载任务 {} 结束: {}", job_id, status));
            Ok(())
        }
        Ok(other) => {
            logger.warn(&other.to_string());
            println!("{}", other);
            Ok(())
        }
        Err(e) => {
            progress.abandon("更新失败");
            ui::print_error(&e.to_string());
            if e.is_fatal() {
                return Err(e).context("更新失败，无法继续");
            }
            logger.warn("更新未完成，下次启动时重试");
            Ok(())
        }
    }
}

/// 显示上次下载任务的状态
async fn show_status(queue: &Addr<DownloadQueueActor>, prefs: &Preferences) -> anyhow::Result<()> {
    let jobs = queue.send(ListJobs).await?;
    println!("下载队列中共有 {} 个任务", jobs.len());

    let Some(job_id) = prefs.last_download_job() else {
        println!("没有下载记录");
        return Ok(());
    };
    match queue.send(QueryJob { job_id }).await? {
        Some(job) => println!("{}", JobSummary(&job)),
        None => println!("下载任务 {} 已不存在", job_id),
    }
    Ok(())
}

/// 丢弃上次下载任务及其文件
async fn discard_last_download(
    tracker: &TransferTracker,
    prefs: &Preferences,
    logger: &Addr<LoggerActor>,
) -> anyhow::Result<()> {
    let Some(job_id) = prefs.last_download_job() else {
        println!("没有下载记录");
        return Ok(());
    };
    tracker.cancel_and_discard(job_id).await?;
    prefs.clear_last_download_job()?;
    ui::print_success(&format!("已丢弃下载任务 {}", job_id));
    logger.info(&format!("丢弃下载任务 {}", job_id));
    Ok(())
}
