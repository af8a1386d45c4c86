//! 提权助手交换协议（请求/响应信封）。
//!
//! 协议形态：
//! - 当前进程把 [`ElevatedRequest`] 以 JSON 写入交换目录中的请求文件
//! - 提权助手执行完毕后把 [`ElevatedResponse`] 以 JSON 写入响应文件，退出码 0 表示响应已写出
//! - 每条消息携带 `request_id`，调用方必须拒绝与未完成请求不匹配的响应
//!
//! 约束与注意事项：
//! - `payload` 为不透明字节，序列化时使用 base64（URL-safe，无填充）
//! - `error_message` 不应包含敏感信息
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::ffi::OsString;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// 一条可提权执行的命令（命令标识 + 负载）。
///
/// 命令标识约定：
/// - 模块命令使用 `"<模块名>::<命令名>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevatedCommand {
    pub command: String,
    pub payload: Vec<u8>,
}

impl ElevatedCommand {
    pub fn new(command: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }

    /// 构造模块命令标识。
    pub fn module_command_id(module: &str, command: &str) -> String {
        format!("{module}::{command}")
    }

    /// 将命令标识拆分为（模块名，命令名）。
    pub fn split_module_command(command: &str) -> Option<(&str, &str)> {
        command.split_once("::")
    }
}

/// 提权请求信封。
///
/// 字段说明：
/// - `request_id`：请求唯一 ID（用于请求-响应关联）
/// - `command`：命令标识
/// - `payload`：不透明负载
/// - `expires_at_unix`：过期时间（Unix 秒），助手拒绝处理过期请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevatedRequest {
    pub request_id: Uuid,
    pub command: String,
    #[serde(with = "payload_b64")]
    pub payload: Vec<u8>,
    pub expires_at_unix: i64,
}

impl ElevatedRequest {
    /// 创建新请求（随机 `request_id`）。
    ///
    /// 参数：
    /// - `ttl`：请求有效期（通常与等待超时一致）
    pub fn new(command: ElevatedCommand, ttl: std::time::Duration) -> Self {
        let ttl = Duration::try_from(ttl).unwrap_or(Duration::MAX);
        let expires_at = OffsetDateTime::now_utc()
            .checked_add(ttl)
            .unwrap_or(OffsetDateTime::now_utc() + Duration::days(1));
        Self {
            request_id: Uuid::new_v4(),
            command: command.command,
            payload: command.payload,
            expires_at_unix: expires_at.unix_timestamp(),
        }
    }

    /// 是否已过期。
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc().unix_timestamp() > self.expires_at_unix
    }
}

/// 提权响应信封。
///
/// 序列化格式：
/// - 使用 `#[serde(tag = "status")]`，在 JSON 中通过 `status: ok|error` 区分结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ElevatedResponse {
    /// 命令执行成功。
    Ok {
        request_id: Uuid,
        #[serde(with = "payload_b64")]
        payload: Vec<u8>,
    },
    /// 命令执行失败（或请求被拒绝）。
    Error {
        request_id: Uuid,
        error_message: String,
    },
}

impl ElevatedResponse {
    pub fn request_id(&self) -> Uuid {
        match self {
            ElevatedResponse::Ok { request_id, .. } | ElevatedResponse::Error { request_id, .. } => {
                *request_id
            }
        }
    }
}

/// 提权助手的命令行调用参数（请求/响应/诊断文件路径）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperInvocation {
    pub request: PathBuf,
    pub response: PathBuf,
    pub diagnostics: PathBuf,
}

/// 进入提权助手模式的命令行开关。
pub const HELPER_FLAG: &str = "--elevated-helper";
/// 提权重启握手文件参数。
pub const HANDSHAKE_FLAG: &str = "--handshake";

impl HelperInvocation {
    /// 生成传给助手进程的参数列表。
    pub fn to_args(&self) -> Vec<OsString> {
        vec![
            OsString::from(HELPER_FLAG),
            OsString::from("--request"),
            self.request.clone().into_os_string(),
            OsString::from("--response"),
            self.response.clone().into_os_string(),
            OsString::from("--diagnostics"),
            self.diagnostics.clone().into_os_string(),
        ]
    }

    /// 从参数列表解析（不含 `HELPER_FLAG` 时返回 `None`）。
    pub fn from_args(args: &[OsString]) -> Option<Self> {
        if !args.iter().any(|a| a == HELPER_FLAG) {
            return None;
        }
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .map(PathBuf::from)
        };
        Some(Self {
            request: value_of("--request")?,
            response: value_of("--response")?,
            diagnostics: value_of("--diagnostics")?,
        })
    }
}

mod payload_b64 {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
