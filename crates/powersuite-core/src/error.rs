//! 核心错误分类与统一结果类型。
//!
//! 约定：
//! - 核心对外的每个操作都返回 [`OperationResult`]，失败统一为 [`CoreError`]
//! - 跨越边界（模块调用、进程启动、磁盘 IO）时捕获底层错误，并作为 `source` 附带保留，便于排障
//! - [`CoreError::kind`] 用于上层按类别决定提示方式（提权被拒仅作提示，不作为告警）
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::module::ModuleState;

/// 统一操作结果：成功携带数据，失败携带 [`CoreError`]。
pub type OperationResult<T> = std::result::Result<T, CoreError>;

/// 失败类别（与 [`CoreError`] 各变体一一对应的粗粒度分类）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 模块自身初始化失败。
    Initialization,
    /// 用户拒绝提权（预期内结果，不是异常）。
    ElevationDenied,
    /// 启动/通信等平台层失败。
    ElevationPlatform,
    /// 等待提权助手超时。
    Timeout,
    /// 设置读写/序列化失败。
    Persistence,
    /// 模块操作执行失败。
    Execution,
    /// 调用方用法错误（未知模块、未就绪、已禁用、注册非法）。
    Usage,
}

/// 核心错误类型。
///
/// 异常处理：
/// - 底层原因统一以 `anyhow::Error` 形式保存在 `source` 中
/// - `message` 类字段不应包含敏感信息
#[derive(Debug, Error)]
pub enum CoreError {
    /// 模块初始化失败（模块自身 setup 报错或崩溃）。
    #[error("模块初始化失败: {module}")]
    Initialization {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    /// 用户在提权提示中选择了拒绝。
    #[error("用户拒绝了管理员权限请求")]
    ElevationDenied,
    /// 提权进程启动、退出码异常或请求/响应交换失败。
    ///
    /// 字段说明：
    /// - `exit_code`：助手进程退出码（未启动或被终止时为 `None`）
    /// - `stderr`：助手进程错误输出/诊断日志（可能为空）
    #[error("提权调用失败: {message}")]
    ElevationPlatform {
        message: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
        #[source]
        source: anyhow::Error,
    },
    /// 等待提权助手响应超过上限。
    #[error("等待提权助手响应超时（{0:?}）")]
    Timeout(Duration),
    /// 设置持久化失败（磁盘满、权限不足、序列化失败等）。
    #[error("设置持久化失败: {}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    /// 模块操作在执行过程中失败。
    #[error("模块执行失败: {module}")]
    Execution {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    /// 提权助手已执行命令，但命令本身返回失败。
    #[error("提权命令执行失败: {command}: {message}")]
    ElevatedCommandFailed { command: String, message: String },
    /// 注册表中不存在该模块。
    #[error("模块不存在: {0}")]
    UnknownModule(String),
    /// 模块当前状态不允许执行。
    #[error("模块未就绪: {module} ({state:?})")]
    NotReady { module: String, state: ModuleState },
    /// 模块已被宿主禁用。
    #[error("模块已禁用: {0}")]
    ModuleDisabled(String),
    /// 注册表构建时发现非法描述（空名称、重名等）。
    #[error("无效的模块注册: {0}")]
    InvalidRegistration(String),
}

impl CoreError {
    /// 返回错误对应的失败类别。
    pub fn kind(&self) -> FailureKind {
        match self {
            CoreError::Initialization { .. } => FailureKind::Initialization,
            CoreError::ElevationDenied => FailureKind::ElevationDenied,
            CoreError::ElevationPlatform { .. } => FailureKind::ElevationPlatform,
            CoreError::Timeout(_) => FailureKind::Timeout,
            CoreError::Persistence { .. } => FailureKind::Persistence,
            CoreError::Execution { .. } | CoreError::ElevatedCommandFailed { .. } => {
                FailureKind::Execution
            }
            CoreError::UnknownModule(_)
            | CoreError::NotReady { .. }
            | CoreError::ModuleDisabled(_)
            | CoreError::InvalidRegistration(_) => FailureKind::Usage,
        }
    }

    /// 生成面向用户的提示文本（标题，正文）。
    ///
    /// 说明：
    /// - 正文包含错误链上最底层的原因，便于用户反馈问题
    pub fn user_message(&self) -> (&'static str, String) {
        let title = match self.kind() {
            FailureKind::Initialization => "模块加载失败",
            FailureKind::ElevationDenied => "未获得管理员权限",
            FailureKind::ElevationPlatform => "提权失败",
            FailureKind::Timeout => "操作超时",
            FailureKind::Persistence => "设置保存失败",
            FailureKind::Execution => "操作失败",
            FailureKind::Usage => "无法执行",
        };
        let mut body = self.to_string();
        if let Some(root) = root_cause(self) {
            body.push_str(": ");
            body.push_str(&root);
        }
        (title, body)
    }

    /// 是否为“用户拒绝提权”这一预期结果。
    pub fn is_denied(&self) -> bool {
        matches!(self, CoreError::ElevationDenied)
    }
}

fn root_cause(err: &CoreError) -> Option<String> {
    let mut cur = std::error::Error::source(err)?;
    while let Some(next) = cur.source() {
        cur = next;
    }
    Some(cur.to_string())
}
