use actix::prelude::*;
use chrono::Local;
use log::Level;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// 初始化控制台日志，库代码通过 `log` 宏输出
pub fn init_console(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_env("APKUP_LOG")
        .format_timestamp_secs()
        .try_init();
}

/// 日志消息
pub struct LogMsg {
    pub level: Level,
    pub message: String,
}
impl Message for LogMsg { type Result = (); }

/// 刷新缓冲区
pub struct FlushLog;
impl Message for FlushLog { type Result = (); }

/// 更新流程日志 Actor，写入文件并按大小轮转
pub struct LoggerActor {
    writer: BufWriter<File>,
    level: Level,
    file_path: PathBuf,
    max_size: u64,
    current_size: u64,
}

impl LoggerActor {
    pub fn new(file_path: impl AsRef<Path>, level: Level, max_size: u64) -> Result<Self, std::io::Error> {
        let file_path = file_path.as_ref().to_path_buf();
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            writer: BufWriter::new(file),
            level,
            file_path,
            max_size,
            current_size,
        })
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.file_path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// 超过上限时把当前文件改名为 .backup 并重新打开
    fn check_rotation(&mut self) -> Result<(), std::io::Error> {
        if self.current_size > self.max_size {
            self.writer.flush()?;
            let backup_path = self.backup_path();
            if backup_path.exists() {
                std::fs::remove_file(&backup_path)?;
            }
            std::fs::rename(&self.file_path, &backup_path)?;

            let file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
            self.writer = BufWriter::new(file);
            self.current_size = 0;
        }
        Ok(())
    }

    fn write_log(&mut self, level: Level, message: &str) -> Result<(), std::io::Error> {
        if level > self.level {
            return Ok(());
        }
        let entry = format!(
            "{} [{}] - {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            message
        );
        self.check_rotation()?;
        self.writer.write_all(entry.as_bytes())?;
        self.current_size += entry.len() as u64;

        if level <= Level::Warn {
            self.writer.flush()?;
        }
        Ok(())
    }
}

impl Actor for LoggerActor {
    type Context = Context<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let _ = self.writer.flush();
    }
}

impl Handler<LogMsg> for LoggerActor {
    type Result = ();
    fn handle(&mut self, msg: LogMsg, _ctx: &mut Self::Context) {
        if let Err(e) = self.write_log(msg.level, &msg.message) {
            eprintln!("日志写入失败: {}", e);
        }
    }
}

impl Handler<FlushLog> for LoggerActor {
    type Result = ();
    fn handle(&mut self, _msg: FlushLog, _ctx: &mut Self::Context) {
        if let Err(e) = self.writer.flush() {
            eprintln!("日志刷新失败: {}", e);
        }
    }
}

// 便捷的日志方法
pub trait LoggerExt {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn debug(&self, message: &str);
}

impl LoggerExt for Addr<LoggerActor> {
    fn info(&self, message: &str) {
        self.do_send(LogMsg { level: Level::Info, message: message.to_string() });
    }

    fn error(&self, message: &str) {
        self.do_send(LogMsg { level: Level::Error, message: message.to_string() });
    }

    fn warn(&self, message: &str) {
        self.do_send(LogMsg { level: Level::Warn, message: message.to_string() });
    }

    fn debug(&self, message: &str) {
        self.do_send(LogMsg { level: Level::Debug, message: message.to_string() });
    }
}
