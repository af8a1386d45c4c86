//! 平台能力封装（提权、防火墙、系统信息）。
//!
//! 目标：
//! - 将 Win32 细节集中在本 crate，核心库只依赖 [`powersuite_core::elevation::ElevationPlatform`] 等抽象
//! - 统一错误处理风格（以 `anyhow::Result` 形式向上返回）
//!
//! 平台说明：
//! - Windows：`IsUserAnAdmin` + `ShellExecuteExW("runas")`
//! - 类 Unix（开发/测试环境）：有效用户 ID + `pkexec`
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod elevation;
pub mod firewall;
pub mod system;
