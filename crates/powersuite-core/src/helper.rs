//! 提权助手侧：读取请求、按命令标识分发、写出响应。
//!
//! 说明：
//! - 助手进程由 [`crate::elevation::ElevationBridge`] 以提权身份启动，每次只处理一个请求
//! - 命令分发通过 [`CommandDispatcher`]：可以是固定的命令目录 [`CommandCatalog`]，
//!   也可以是模块注册表（按 `"<模块名>::<命令名>"` 路由到模块）
//! - 只要响应文件写出成功（包括“命令失败”的错误响应），助手即应以退出码 0 结束
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::ipc::{ElevatedRequest, ElevatedResponse, HelperInvocation};
use crate::paths;

/// 提权命令分发接口。
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// 执行命令并返回结果负载。
    async fn dispatch(&self, command: &str, payload: &[u8]) -> Result<Vec<u8>>;
}

type Handler = Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// 固定命令目录：命令标识 → 处理函数。
#[derive(Default)]
pub struct CommandCatalog {
    handlers: BTreeMap<String, Handler>,
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册命令处理函数（同名覆盖）。
    pub fn register<F>(&mut self, command: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.handlers.insert(command.into(), Box::new(handler));
        self
    }

    /// 已注册的命令标识。
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[async_trait]
impl CommandDispatcher for CommandCatalog {
    async fn dispatch(&self, command: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let handler = self
            .handlers
            .get(command)
            .ok_or_else(|| anyhow!("未注册的提权命令: {command}"))?;
        handler(payload)
    }
}

/// 处理一次提权请求。
///
/// 参数：
/// - `invocation`：请求/响应文件路径
/// - `dispatcher`：命令分发器
///
/// 返回值：
/// - `Ok(())`：响应已写出（命令本身可能失败，失败信息在响应中）
///
/// 异常处理：
/// - 请求文件读取/解析失败：无法得知 `request_id`，直接返回错误（调用方应以非 0 退出）
/// - 响应写出失败：返回错误
pub async fn serve_request(invocation: &HelperInvocation, dispatcher: &dyn CommandDispatcher) -> Result<()> {
    let raw = tokio::fs::read(&invocation.request)
        .await
        .with_context(|| format!("读取提权请求失败: {}", invocation.request.display()))?;
    let request: ElevatedRequest = serde_json::from_slice(&raw).context("解析提权请求失败")?;
    let request_id = request.request_id;

    let response = if request.is_expired() {
        warn!(request_id = %request_id, "提权请求已过期，拒绝执行");
        ElevatedResponse::Error {
            request_id,
            error_message: "请求已过期".to_string(),
        }
    } else {
        info!(request_id = %request_id, command = %request.command, "执行提权命令");
        match dispatcher.dispatch(&request.command, &request.payload).await {
            Ok(payload) => ElevatedResponse::Ok { request_id, payload },
            Err(e) => {
                warn!(request_id = %request_id, "提权命令失败: {e:#}");
                ElevatedResponse::Error {
                    request_id,
                    error_message: format!("{e:#}"),
                }
            }
        }
    };

    let bytes = serde_json::to_vec(&response).context("序列化提权响应失败")?;
    paths::write_atomic(&invocation.response, &bytes).await?;
    Ok(())
}
