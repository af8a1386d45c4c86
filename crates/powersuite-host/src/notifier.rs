//! 控制台通知实现。
//!
//! 说明：
//! - 提示信息输出到 stderr，命令结果保留给 stdout
//! - `--yes` 时确认类提示自动同意；标准输入不可读时使用默认选项
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::io::{BufRead, Write};

use async_trait::async_trait;
use powersuite_core::notify::Notifier;

pub struct ConsoleNotifier {
    assume_yes: bool,
}

impl ConsoleNotifier {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn show_success(&self, title: &str, message: &str) {
        eprintln!("[成功] {title}: {message}");
    }

    fn show_info(&self, title: &str, message: &str) {
        eprintln!("[提示] {title}: {message}");
    }

    fn show_warning(&self, title: &str, message: &str) {
        eprintln!("[警告] {title}: {message}");
    }

    fn show_error(&self, title: &str, message: &str) {
        eprintln!("[错误] {title}: {message}");
    }

    async fn confirm(&self, title: &str, message: &str, default_yes: bool) -> bool {
        if self.assume_yes {
            return true;
        }
        let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
        let question = format!("{title}: {message} {hint} ");
        match read_answer(question).await {
            Some(answer) => match answer.trim().to_ascii_lowercase().as_str() {
                "" => default_yes,
                "y" | "yes" | "是" => true,
                _ => false,
            },
            None => default_yes,
        }
    }

    async fn prompt(&self, title: &str, message: &str, default_value: &str) -> Option<String> {
        if self.assume_yes {
            return Some(default_value.to_string());
        }
        let question = format!("{title}: {message} [{default_value}] ");
        let answer = read_answer(question).await?;
        let answer = answer.trim();
        Some(if answer.is_empty() {
            default_value.to_string()
        } else {
            answer.to_string()
        })
    }
}

/// 在阻塞线程中读取一行输入；EOF 或读取失败返回 `None`。
async fn read_answer(question: String) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{question}");
        let _ = stderr.flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await
    .ok()
    .flatten()
}
