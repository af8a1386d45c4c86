//! PowerSuite 核心库（与界面/平台无关）。
//!
//! 功能：
//! - 模块契约与生命周期注册表（发现、初始化、执行门控、清理）
//! - 持久化设置存储（全局键 + 按模块分区、变更通知、原子写入、热重载）
//! - 提权桥：权限检测、以管理员重启、跨进程执行命名命令
//! - 统一的失败类型与用户通知接口
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod elevation;
pub mod error;
pub mod helper;
pub mod ipc;
pub mod module;
pub mod notify;
pub mod paths;
pub mod registry;
pub mod settings;
pub mod value;

pub use error::{CoreError, FailureKind, OperationResult};
pub use value::SettingValue;
