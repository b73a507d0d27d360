use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Instant;

use super::{format_size, format_speed};

const BAR_TEMPLATE: &str = "{spinner} [{bar:40}] {bytes}/{total_bytes} {msg}";

/// 下载进度条
pub struct ProgressManager {
    bar: ProgressBar,
    // 上次更新的时间与字节数，用于计算速度
    last_sample: Mutex<(Instant, u64)>,
}

impl ProgressManager {
    pub fn new(title: &str) -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message(title.to_string());
        Self {
            bar,
            last_sample: Mutex::new((Instant::now(), 0)),
        }
    }

    pub fn update_progress(&self, downloaded: u64, total: u64) {
        if total > 0 && self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(downloaded);

        let mut sample = self.last_sample.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = sample.0.elapsed().as_secs_f64();
        if elapsed < 0.5 {
            return;
        }
        let speed = (downloaded.saturating_sub(sample.1) as f64 / elapsed) as u64;
        *sample = (Instant::now(), downloaded);

        let eta = if speed > 0 && total > downloaded {
            let seconds = (total - downloaded) / speed;
            if seconds > 3600 {
                format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
            } else if seconds > 60 {
                format!("{}m{}s", seconds / 60, seconds % 60)
            } else {
                format!("{}s", seconds)
            }
        } else {
            "未知".to_string()
        };
        self.bar.set_message(format!("{} | ETA:{}", format_speed(speed), eta));
    }

    pub fn finish(&self) {
        let downloaded = self.bar.position();
        self.bar.finish_with_message(format!("完成，共 {}", format_size(downloaded)));
    }

    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}
