use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use std::time::Duration;

use crate::update::gate::{ConsentPrompt, PermissionRequestContext, PromptAnswer};

const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 终端中的安装权限弹窗，单键作答
#[derive(Debug, Default)]
pub struct TerminalConsentPrompt;

impl TerminalConsentPrompt {
    pub fn new() -> Self {
        Self
    }

    /// 阻塞读取一个按键，返回是否选择了确认项
    fn read_choice(accept: char, reject: char) -> bool {
        if terminal::enable_raw_mode().is_err() {
            return false;
        }
        let choice = loop {
            match event::poll(KEYBOARD_POLL_INTERVAL) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => break false,
            }
            let Ok(Event::Key(key)) = event::read() else { continue };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char(c) if c.eq_ignore_ascii_case(&accept) => break true,
                KeyCode::Enter => break true,
                KeyCode::Char(c) if c.eq_ignore_ascii_case(&reject) => break false,
                KeyCode::Esc => break false,
                _ => {}
            }
        };
        let _ = terminal::disable_raw_mode();
        choice
    }

    async fn ask_key(accept: char, reject: char) -> bool {
        tokio::task::spawn_blocking(move || Self::read_choice(accept, reject))
            .await
            .unwrap_or(false)
    }
}

#[async_trait(?Send)]
impl ConsentPrompt for TerminalConsentPrompt {
    async fn ask(&self, request: &PermissionRequestContext) -> PromptAnswer {
        println!();
        match &request.icon {
            Some(icon) => println!("[{}] 申请权限", icon),
            None => println!("申请权限"),
        }
        println!("{}", request.message);
        println!("按 's' 打开设置，按 'c' 取消");

        if Self::ask_key('s', 'c').await {
            PromptAnswer::OpenSettings
        } else {
            PromptAnswer::Cancel
        }
    }

    async fn confirm_settings(&self, _request: &PermissionRequestContext) -> bool {
        println!("是否已在设置中允许安装未知来源应用？按 'y' 确认，按 'n' 放弃");
        Self::ask_key('y', 'n').await
    }
}
