//! 用户通知/确认协作接口。
//!
//! 说明：
//! - 核心从不自行渲染界面；所有面向用户的提示与确认都通过 [`Notifier`] 交给宿主实现
//! - [`report_failure`] 按失败类别选择提示方式：拒绝提权为普通提示，其余为错误
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use async_trait::async_trait;

use crate::error::CoreError;

/// 通知与对话框接口（由宿主实现）。
#[async_trait]
pub trait Notifier: Send + Sync {
    fn show_success(&self, title: &str, message: &str);
    fn show_info(&self, title: &str, message: &str);
    fn show_warning(&self, title: &str, message: &str);
    fn show_error(&self, title: &str, message: &str);

    /// 确认对话框。
    ///
    /// 返回值：
    /// - `true`：用户确认
    async fn confirm(&self, title: &str, message: &str, default_yes: bool) -> bool;

    /// 输入对话框。
    ///
    /// 返回值：
    /// - `None`：用户取消
    async fn prompt(&self, title: &str, message: &str, default_value: &str) -> Option<String>;
}

/// 不做任何展示的通知实现；确认一律返回默认选项。
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    fn show_success(&self, _title: &str, _message: &str) {}
    fn show_info(&self, _title: &str, _message: &str) {}
    fn show_warning(&self, _title: &str, _message: &str) {}
    fn show_error(&self, _title: &str, _message: &str) {}

    async fn confirm(&self, _title: &str, _message: &str, default_yes: bool) -> bool {
        default_yes
    }

    async fn prompt(&self, _title: &str, _message: &str, default_value: &str) -> Option<String> {
        Some(default_value.to_string())
    }
}

/// 将失败以合适的方式提示给用户。
pub fn report_failure(notifier: &dyn Notifier, err: &CoreError) {
    let (title, message) = err.user_message();
    if err.is_denied() {
        notifier.show_info(title, &message);
    } else {
        notifier.show_error(title, &message);
    }
}
