mod progress;
mod prompt;

use std::fmt;
pub use progress::ProgressManager;
pub use prompt::TerminalConsentPrompt;

use crate::core::queue::JobRecord;
use crate::update::orchestrator::UpdateNotifier;

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("✗ {}", message);
}

/// 在终端输出提示
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl UpdateNotifier for ConsoleNotifier {
    fn notice(&self, message: &str) {
        print_error(message);
    }
}

/// 下载任务摘要，`--status` 使用
pub struct JobSummary<'a>(pub &'a JobRecord);

impl fmt::Display for JobSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let job = self.0;
        let progress = job.progress();
        writeln!(f, "\n下载任务 {}:", job.id)?;
        writeln!(f, "标题: {}", job.title)?;
        writeln!(f, "地址: {}", job.source_url)?;
        writeln!(f, "文件: {}", job.save_path.display())?;
        writeln!(f, "状态: {}", job.status())?;
        writeln!(
            f,
            "进度: {} / {} ({:.1}%)",
            format_size(progress.downloaded),
            format_size(progress.total),
            progress.percent()
        )?;
        write!(f, "创建时间: {}", job.created_at.format("%Y-%m-%d %H:%M:%S"))?;
        if let Some(finished) = job.finished_at.filter(|_| job.status().is_terminal()) {
            write!(f, "\n完成时间: {}", finished.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_sec: u64) -> String {
    if bytes_per_sec > 1024 * 1024 {
        format!("{:.2} MB/s", bytes_per_sec as f64 / (1024.0 * 1024.0))
    } else if bytes_per_sec > 1024 {
        format!("{:.2} KB/s", bytes_per_sec as f64 / 1024.0)
    } else {
        format!("{} B/s", bytes_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(100), "100 B/s");
        assert_eq!(format_speed(2048), "2.00 KB/s");
    }
}
