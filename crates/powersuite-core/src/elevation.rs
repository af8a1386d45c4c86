//! 提权桥：权限检测、以管理员身份重启、在提权助手进程中执行单条命令。
//!
//! 模型：
//! - 提权执行一律跨进程：命令必须是预先注册的“命名命令 + 可序列化负载”，不接受任意闭包
//! - 请求通过交换目录中的临时文件传递（见 [`crate::ipc`]），每个请求独占一组文件与唯一 `request_id`
//! - 平台相关的“以管理员身份启动进程”由 [`ElevationPlatform`] 实现（见 powersuite-windows）
//!
//! 异常处理：
//! - 进程启动、等待、退出码、文件交换中的任何失败都在本模块边界转换为 [`CoreError`]，不会向上抛出 panic
//! - 用户拒绝提权是预期结果：`request_elevation` 返回 `Ok(false)`，命令执行返回 [`CoreError::ElevationDenied`]
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, OperationResult};
use crate::ipc::{ElevatedCommand, ElevatedRequest, ElevatedResponse, HelperInvocation, HANDSHAKE_FLAG};
use crate::paths;

/// 默认等待提权助手响应的上限。
pub const DEFAULT_ELEVATION_TIMEOUT: Duration = Duration::from_secs(60);

/// 握手文件轮询间隔。
const HANDSHAKE_POLL: Duration = Duration::from_millis(100);

/// 提权进程的退出信息。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperExit {
    /// 退出码（被信号终止等情况下为 `None`）。
    pub code: Option<i32>,
    /// 平台能捕获到的错误输出（Windows 提权启动无法重定向，通常为空）。
    pub stderr: String,
}

/// 已启动的提权进程句柄。
#[async_trait]
pub trait ElevatedProcess: Send {
    /// 等待进程退出。
    ///
    /// 注意：
    /// - 返回的 future 被丢弃后允许再次调用
    async fn wait(&mut self) -> anyhow::Result<HelperExit>;

    /// 尽力终止进程（超时后调用），失败只记录日志。
    fn kill(&mut self);
}

/// 提权启动结果。
pub enum LaunchOutcome {
    /// 进程已以提权身份启动。
    Started(Box<dyn ElevatedProcess>),
    /// 用户在系统提示中拒绝了提权。
    Declined,
}

/// 平台提权能力。
#[async_trait]
pub trait ElevationPlatform: Send + Sync {
    /// 当前进程是否已具备管理员权限（每次调用实时查询）。
    fn is_elevated(&self) -> anyhow::Result<bool>;

    /// 以提权身份启动 `exe args...`。
    async fn launch_elevated(&self, exe: &Path, args: &[OsString]) -> anyhow::Result<LaunchOutcome>;

    /// 某些平台只能在进程退出后才知道用户是否拒绝（例如 pkexec 的 126）。
    fn is_declined_exit(&self, _code: i32) -> bool {
        false
    }
}

/// 提权桥配置。
///
/// 字段说明：
/// - `helper_exe`：提权助手可执行文件（通常就是当前程序自身）
/// - `exchange_dir`：请求/响应/握手文件所在目录
/// - `timeout`：等待单条提权命令完成的上限
/// - `handshake_timeout`：以管理员重启时等待新实例握手的上限（包含用户确认提示的时间）
/// - `relaunch_args`：以管理员重启时附加给新实例的参数
/// - `helper_args`：附加给提权助手的参数（例如 `--settings <file>`，pkexec 不会透传环境变量）
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub helper_exe: PathBuf,
    pub exchange_dir: PathBuf,
    pub timeout: Duration,
    pub handshake_timeout: Duration,
    pub relaunch_args: Vec<OsString>,
    pub helper_args: Vec<OsString>,
}

impl BridgeConfig {
    /// 以当前可执行文件作为助手的默认配置。
    ///
    /// 异常处理：
    /// - 无法获取当前 exe 路径时返回错误
    pub fn for_current_exe() -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("读取当前可执行文件路径失败")?;
        Ok(Self::new(exe, paths::default_exchange_dir()))
    }

    pub fn new(helper_exe: PathBuf, exchange_dir: PathBuf) -> Self {
        Self {
            helper_exe,
            exchange_dir,
            timeout: DEFAULT_ELEVATION_TIMEOUT,
            handshake_timeout: DEFAULT_ELEVATION_TIMEOUT,
            relaunch_args: Vec::new(),
            helper_args: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_relaunch_args(mut self, args: Vec<OsString>) -> Self {
        self.relaunch_args = args;
        self
    }

    pub fn with_helper_args(mut self, args: Vec<OsString>) -> Self {
        self.helper_args = args;
        self
    }
}

/// 以管理员身份重启的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// 当前进程已是管理员，无需重启。
    AlreadyElevated,
    /// 新的提权实例已完成握手；调用方应保存状态后退出当前进程。
    HandedOff,
    /// 用户拒绝提权；当前进程继续正常运行。
    Declined,
}

/// 提权桥。
pub struct ElevationBridge {
    platform: Arc<dyn ElevationPlatform>,
    config: BridgeConfig,
    outstanding: Mutex<HashSet<Uuid>>,
}

impl ElevationBridge {
    pub fn new(platform: Arc<dyn ElevationPlatform>, config: BridgeConfig) -> Self {
        Self {
            platform,
            config,
            outstanding: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// 当前进程是否为管理员（不缓存）。
    ///
    /// 异常处理：
    /// - 平台查询失败时记录警告并按“未提权”处理
    pub fn is_elevated(&self) -> bool {
        match self.platform.is_elevated() {
            Ok(v) => v,
            Err(e) => {
                warn!("查询提权状态失败，按未提权处理: {e:#}");
                false
            }
        }
    }

    /// 请求提权。
    ///
    /// 返回值：
    /// - `Ok(true)`：已是管理员，或新的提权实例已启动
    /// - `Ok(false)`：用户拒绝（预期结果，不是错误）
    pub async fn request_elevation(&self) -> OperationResult<bool> {
        match self.restart_as_administrator().await? {
            RestartOutcome::AlreadyElevated | RestartOutcome::HandedOff => Ok(true),
            RestartOutcome::Declined => Ok(false),
        }
    }

    /// 以管理员身份启动新实例，并等待其完成启动握手。
    ///
    /// 行为：
    /// - 新实例以 `--handshake <file>` 启动，启动完成后写入握手文件（见 [`complete_handshake`]）
    /// - 只有握手成功才返回 [`RestartOutcome::HandedOff`]；是否退出当前进程由调用方决定
    /// - 新实例在握手前退出或握手超时：返回错误，当前进程保持不变（超时会尽力终止新实例）
    pub async fn restart_as_administrator(&self) -> OperationResult<RestartOutcome> {
        if self.is_elevated() {
            return Ok(RestartOutcome::AlreadyElevated);
        }

        let token = Uuid::new_v4();
        paths::ensure_dir(&self.config.exchange_dir)
            .map_err(|e| platform_error("创建交换目录失败", None, None, e))?;
        let handshake = self.config.exchange_dir.join(format!("{token}.ready"));
        let _cleanup = ExchangeFiles {
            files: vec![handshake.clone()],
        };

        let mut args = vec![OsString::from(HANDSHAKE_FLAG), handshake.clone().into_os_string()];
        args.extend(self.config.relaunch_args.iter().cloned());

        info!("以管理员身份重启: {}", self.config.helper_exe.display());
        let deadline = Instant::now() + self.config.handshake_timeout;
        let launched = tokio::time::timeout_at(
            deadline,
            self.platform.launch_elevated(&self.config.helper_exe, &args),
        )
        .await;
        let mut process = match launched {
            Ok(Ok(LaunchOutcome::Started(p))) => p,
            Ok(Ok(LaunchOutcome::Declined)) => {
                info!("用户拒绝了提权，继续以当前权限运行");
                return Ok(RestartOutcome::Declined);
            }
            Ok(Err(e)) => return Err(platform_error("启动提权实例失败", None, None, e)),
            Err(_) => {
                warn!("等待用户确认提权超时");
                return Err(CoreError::Timeout(self.config.handshake_timeout));
            }
        };

        let waited = {
            let wait = process.wait();
            tokio::pin!(wait);
            let watch = async {
                let mut ticker = tokio::time::interval(HANDSHAKE_POLL);
                loop {
                    tokio::select! {
                        exit = &mut wait => return HandshakeWait::Exited(exit),
                        _ = ticker.tick() => {
                            if handshake_ready(&handshake).await {
                                return HandshakeWait::Ready;
                            }
                        }
                    }
                }
            };
            tokio::time::timeout_at(deadline, watch).await
        };

        match waited {
            Ok(HandshakeWait::Ready) => {
                info!("提权实例已就绪");
                Ok(RestartOutcome::HandedOff)
            }
            Ok(HandshakeWait::Exited(Ok(exit))) => {
                if let Some(code) = exit.code {
                    if self.platform.is_declined_exit(code) {
                        info!("用户拒绝了提权，继续以当前权限运行");
                        return Ok(RestartOutcome::Declined);
                    }
                }
                Err(platform_error(
                    "提权实例在握手前退出",
                    exit.code,
                    non_empty(exit.stderr),
                    anyhow!("exit code {:?}", exit.code),
                ))
            }
            Ok(HandshakeWait::Exited(Err(e))) => Err(platform_error("等待提权实例失败", None, None, e)),
            Err(_) => {
                warn!("等待提权实例握手超时，终止新实例");
                process.kill();
                Err(CoreError::Timeout(self.config.handshake_timeout))
            }
        }
    }

    /// 在提权助手中执行命令，并将结果负载按 JSON 反序列化。
    pub async fn execute_elevated<T: DeserializeOwned>(&self, command: ElevatedCommand) -> OperationResult<T> {
        let command_id = command.command.clone();
        let payload = self.execute_elevated_raw(command).await?;
        serde_json::from_slice(&payload).map_err(|e| {
            platform_error(
                "解析提权命令结果失败",
                None,
                None,
                anyhow::Error::new(e).context(command_id),
            )
        })
    }

    /// 在提权助手中执行命令，返回原始结果负载。
    ///
    /// 主要步骤：
    /// 1) 生成唯一 `request_id`，写入请求文件
    /// 2) 以提权身份启动助手（附加 `helper_args`），限时等待其退出；时限从发起启动算起，
    ///    包含用户确认提示的时间（超时返回 [`CoreError::Timeout`] 并尽力终止助手）
    /// 3) 校验退出码（非 0 时携带退出码与诊断输出返回失败）
    /// 4) 读取响应并校验 `request_id`，不匹配则拒绝
    ///
    /// 异常处理：
    /// - 交换文件在返回前会被删除（尽力而为）
    pub async fn execute_elevated_raw(&self, command: ElevatedCommand) -> OperationResult<Vec<u8>> {
        let request = ElevatedRequest::new(command, self.config.timeout);
        let id = request.request_id;
        let command_id = request.command.clone();

        let invocation = HelperInvocation {
            request: self.config.exchange_dir.join(format!("{id}.request.json")),
            response: self.config.exchange_dir.join(format!("{id}.response.json")),
            diagnostics: self.config.exchange_dir.join(format!("{id}.log")),
        };
        let _cleanup = ExchangeFiles {
            files: vec![
                invocation.request.clone(),
                invocation.response.clone(),
                invocation.diagnostics.clone(),
            ],
        };
        let _outstanding = Outstanding::register(&self.outstanding, id);

        info!(request_id = %id, command = %command_id, "发起提权命令");
        let bytes = serde_json::to_vec(&request)
            .context("序列化提权请求失败")
            .map_err(|e| platform_error("写入提权请求失败", None, None, e))?;
        paths::write_atomic(&invocation.request, &bytes)
            .await
            .map_err(|e| platform_error("写入提权请求失败", None, None, e))?;

        let mut args = invocation.to_args();
        args.extend(self.config.helper_args.iter().cloned());

        let deadline = Instant::now() + self.config.timeout;
        let launched = tokio::time::timeout_at(
            deadline,
            self.platform.launch_elevated(&self.config.helper_exe, &args),
        )
        .await;
        let mut process = match launched {
            Ok(Ok(LaunchOutcome::Started(p))) => p,
            Ok(Ok(LaunchOutcome::Declined)) => {
                info!(request_id = %id, "用户拒绝了提权");
                return Err(CoreError::ElevationDenied);
            }
            Ok(Err(e)) => return Err(platform_error("启动提权助手失败", None, None, e)),
            Err(_) => {
                warn!(request_id = %id, "等待用户确认提权超时");
                return Err(CoreError::Timeout(self.config.timeout));
            }
        };

        let waited = tokio::time::timeout_at(deadline, process.wait()).await;
        let exit = match waited {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => return Err(platform_error("等待提权助手失败", None, None, e)),
            Err(_) => {
                warn!(request_id = %id, "提权助手超时，尝试终止");
                process.kill();
                return Err(CoreError::Timeout(self.config.timeout));
            }
        };

        match exit.code {
            Some(0) => {}
            Some(code) if self.platform.is_declined_exit(code) => {
                info!(request_id = %id, "用户拒绝了提权");
                return Err(CoreError::ElevationDenied);
            }
            code => {
                let stderr = collect_diagnostics(exit.stderr, &invocation.diagnostics).await;
                warn!(request_id = %id, exit_code = ?code, "提权助手异常退出");
                return Err(platform_error(
                    "提权助手异常退出",
                    code,
                    non_empty(stderr),
                    anyhow!("exit code {code:?}"),
                ));
            }
        }

        let raw = tokio::fs::read(&invocation.response)
            .await
            .with_context(|| format!("读取提权响应失败: {}", invocation.response.display()))
            .map_err(|e| platform_error("读取提权响应失败", Some(0), None, e))?;
        let response: ElevatedResponse = serde_json::from_slice(&raw)
            .context("解析提权响应失败")
            .map_err(|e| platform_error("解析提权响应失败", Some(0), None, e))?;

        let answered = response.request_id();
        if answered != id || !self.outstanding.lock().contains(&answered) {
            warn!(request_id = %id, answered = %answered, "提权响应 request_id 不匹配，已拒绝");
            return Err(platform_error(
                "提权响应与请求不匹配",
                Some(0),
                None,
                anyhow!("expected {id}, got {answered}"),
            ));
        }

        match response {
            ElevatedResponse::Ok { payload, .. } => {
                debug!(request_id = %id, "提权命令完成");
                Ok(payload)
            }
            ElevatedResponse::Error { error_message, .. } => Err(CoreError::ElevatedCommandFailed {
                command: command_id,
                message: error_message,
            }),
        }
    }
}

/// 由新的提权实例调用：写入握手文件，通知发起方“已启动完成”。
pub async fn complete_handshake(path: &Path) -> anyhow::Result<()> {
    paths::write_atomic(path, std::process::id().to_string().as_bytes())
        .await
        .with_context(|| format!("写入握手文件失败: {}", path.display()))
}

enum HandshakeWait {
    Ready,
    Exited(anyhow::Result<HelperExit>),
}

async fn handshake_ready(path: &Path) -> bool {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => !s.trim().is_empty(),
        Err(_) => false,
    }
}

async fn collect_diagnostics(stderr: String, diagnostics: &Path) -> String {
    let mut out = stderr.trim().to_string();
    if let Ok(log) = tokio::fs::read_to_string(diagnostics).await {
        let log = log.trim();
        if !log.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(log);
        }
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn platform_error(
    message: &str,
    exit_code: Option<i32>,
    stderr: Option<String>,
    source: anyhow::Error,
) -> CoreError {
    CoreError::ElevationPlatform {
        message: message.to_string(),
        exit_code,
        stderr,
        source,
    }
}

/// 交换文件清理守卫（离开作用域时尽力删除）。
struct ExchangeFiles {
    files: Vec<PathBuf>,
}

impl Drop for ExchangeFiles {
    fn drop(&mut self) {
        for f in &self.files {
            let _ = std::fs::remove_file(f);
        }
    }
}

/// 未完成请求登记（离开作用域时注销）。
struct Outstanding<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> Outstanding<'a> {
    fn register(set: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> Self {
        set.lock().insert(id);
        Self { set, id }
    }
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}
