//! PowerSuite 命令行宿主。
//!
//! 职责：
//! - 组装内置模块、设置存储与提权桥，提供模块列表/执行、设置读写、提权重启、环境自检
//! - 以 `--elevated-helper` 启动时作为提权助手：执行单条命名命令并写出响应后退出
//! - 以 `--handshake <file>` 启动时（提权重启后的新实例）先完成握手，再执行正常命令
//!
//! 退出码约定：
//! - 助手模式下，0 当且仅当响应文件已写出
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use powersuite_core::elevation::{complete_handshake, BridgeConfig, ElevationBridge, RestartOutcome};
use powersuite_core::helper::serve_request;
use powersuite_core::ipc::HelperInvocation;
use powersuite_core::module::ModuleCommand;
use powersuite_core::notify::{report_failure, Notifier, SilentNotifier};
use powersuite_core::paths;
use powersuite_core::registry::ModuleLifecycleRegistry;
use powersuite_core::settings::{keys, SettingsStore};
use powersuite_core::value::SettingValue;
use powersuite_windows::elevation::OsElevation;
use powersuite_windows::system;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod modules;
mod notifier;

use notifier::ConsoleNotifier;

/// 模块设置中用于覆盖描述信息的键。
const MODULE_ENABLED_KEY: &str = "Enabled";
const MODULE_DISPLAY_ORDER_KEY: &str = "DisplayOrder";

/// 命令行参数。
///
/// 说明：
/// - `settings` 覆盖默认设置文件路径（默认 `<配置目录>/WindowsPowerSuite/settings.json`）
/// - `yes` 自动同意所有确认提示
/// - 隐藏参数仅供提权助手与提权重启使用
#[derive(Debug, Parser)]
#[command(name = "powersuite-host", version)]
struct Cli {
    #[arg(long, global = true, env = "POWERSUITE_SETTINGS")]
    settings: Option<PathBuf>,

    #[arg(long, global = true, env = "POWERSUITE_ELEVATION_TIMEOUT_SECS", default_value_t = 60)]
    elevation_timeout_secs: u64,

    #[arg(long, short = 'y', global = true, default_value_t = false)]
    yes: bool,

    #[arg(long = "elevated-helper", hide = true, default_value_t = false)]
    elevated_helper: bool,

    #[arg(long, hide = true)]
    request: Option<PathBuf>,

    #[arg(long, hide = true)]
    response: Option<PathBuf>,

    #[arg(long, hide = true)]
    diagnostics: Option<PathBuf>,

    #[arg(long, hide = true)]
    handshake: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// 宿主支持的子命令。
#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// 列出可用模块（默认）。
    List,
    /// 执行模块命令。
    Run {
        module: String,
        command: String,
        /// 命令负载（JSON）。
        #[arg(long)]
        payload: Option<String>,
    },
    /// 读写用户设置。
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// 以管理员身份重启，并在新实例中执行给定参数（默认 `doctor`）。
    Elevate {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// 环境自检（权限、设置位置、系统概况、模块状态）。
    Doctor,
}

#[derive(Debug, Clone, Subcommand)]
enum SettingsAction {
    /// 读取设置（输出 JSON）。
    Get {
        key: String,
        #[arg(long)]
        module: Option<String>,
    },
    /// 写入设置并保存；值按 JSON 解析，解析失败时按字符串处理。
    Set {
        key: String,
        value: String,
        #[arg(long)]
        module: Option<String>,
    },
    /// 恢复默认值并保存。
    Reset,
    /// 输出设置文件路径。
    Path,
}

/// 程序入口：解析参数，按模式分发。
///
/// 异常处理：
/// - 任意命令失败会记录日志并以非 0 退出
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.elevated_helper {
        return run_helper(&cli).await;
    }

    let settings_path = match &cli.settings {
        Some(p) => p.clone(),
        None => paths::default_settings_file()?,
    };
    init_logging(&configured_level(&settings_path));

    let result = run(cli, settings_path).await;
    if let Err(e) = &result {
        error!(critical = true, "{e:#}");
    }
    result
}

/// 运行期依赖。
struct Host {
    settings: Arc<SettingsStore>,
    bridge: Arc<ElevationBridge>,
    registry: Arc<ModuleLifecycleRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl Host {
    /// 组装宿主：加载设置、构建提权桥与模块注册表，并应用模块级覆盖设置。
    async fn build(
        settings_path: PathBuf,
        timeout: Duration,
        relaunch_args: Vec<OsString>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        // 提权助手可能以其他用户身份运行，默认路径会不同，因此总是显式传递设置文件。
        let helper_args = vec![OsString::from("--settings"), settings_path.clone().into_os_string()];
        let settings = Arc::new(SettingsStore::new(settings_path));
        settings.load().await?;

        let config = BridgeConfig::for_current_exe()?
            .with_timeout(timeout)
            .with_relaunch_args(relaunch_args)
            .with_helper_args(helper_args);
        let bridge = Arc::new(ElevationBridge::new(Arc::new(OsElevation::new()), config));

        let registry = Arc::new(ModuleLifecycleRegistry::new(
            modules::module_table()?,
            settings.clone(),
            bridge.clone(),
            notifier.clone(),
        ));
        for d in registry.discover() {
            let enabled = settings.get_module_setting(&d.name, MODULE_ENABLED_KEY, d.enabled);
            let order = settings.get_module_setting(&d.name, MODULE_DISPLAY_ORDER_KEY, d.display_order);
            registry.set_enabled(&d.name, enabled)?;
            registry.set_display_order(&d.name, order)?;
        }

        Ok(Self {
            settings,
            bridge,
            registry,
            notifier,
        })
    }

    /// 正常退出：清理模块，保存未落盘的设置。
    async fn shutdown(&self) -> Result<()> {
        self.registry.cleanup_all().await;
        if self.settings.is_dirty() {
            self.settings.save().await?;
        }
        Ok(())
    }
}

async fn run(cli: Cli, settings_path: PathBuf) -> Result<()> {
    let command = cli.command.clone().unwrap_or(Commands::List);

    let mut relaunch_args: Vec<OsString> = vec!["--settings".into(), settings_path.clone().into_os_string()];
    match &command {
        Commands::Elevate { args } if !args.is_empty() => relaunch_args.extend(args.iter().map(OsString::from)),
        _ => relaunch_args.push("doctor".into()),
    }

    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new(cli.yes));
    let host = Host::build(
        settings_path,
        Duration::from_secs(cli.elevation_timeout_secs),
        relaunch_args,
        notifier,
    )
    .await?;

    if let Some(path) = &cli.handshake {
        complete_handshake(path).await?;
        info!("已完成提权握手");
    }

    let result = match command {
        Commands::List => {
            list(&host);
            Ok(())
        }
        Commands::Run {
            module,
            command,
            payload,
        } => run_module(&host, &module, command, payload).await,
        Commands::Settings { action } => settings_command(&host, action).await,
        Commands::Elevate { .. } => elevate(&host).await,
        Commands::Doctor => doctor(&host).await,
    };

    let shutdown = host.shutdown().await;
    result.and(shutdown)
}

fn list(host: &Host) {
    for d in host.registry.discover() {
        let state = host
            .registry
            .state(&d.name)
            .map(|s| format!("{s:?}"))
            .unwrap_or_default();
        println!(
            "{:<14} {:<8} {:<6} {:<8} {:<10} {}{}",
            d.name,
            d.version,
            d.category,
            if d.requires_elevation { "需要提权" } else { "-" },
            state,
            d.description,
            if d.enabled { "" } else { "（已禁用）" }
        );
    }
}

async fn run_module(host: &Host, module: &str, command: String, payload: Option<String>) -> Result<()> {
    let payload = match payload {
        Some(text) => {
            let value: serde_json::Value = serde_json::from_str(&text).context("--payload 不是合法 JSON")?;
            serde_json::to_vec(&value)?
        }
        None => Vec::new(),
    };

    host.registry.initialize(module).await?;
    if !host.registry.can_execute(module).await {
        bail!("模块在当前环境下不可用: {module}");
    }
    host.settings.set(keys::LAST_SELECTED_MODULE, module);

    let out = host
        .registry
        .execute_raw(module, ModuleCommand { name: command, payload })
        .await?;
    match serde_json::from_slice::<serde_json::Value>(&out) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", String::from_utf8_lossy(&out)),
    }
    Ok(())
}

async fn settings_command(host: &Host, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Get { key, module } => {
            let value = match module {
                Some(m) => host.settings.snapshot().module_get(&m, &key).cloned(),
                None => host.settings.get_value(&key),
            };
            let json = value.map(|v| v.to_json()).unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::to_string(&json)?);
        }
        SettingsAction::Set { key, value, module } => {
            let parsed = serde_json::from_str::<serde_json::Value>(&value)
                .ok()
                .and_then(|v| SettingValue::from_json(&v))
                .unwrap_or_else(|| SettingValue::from(value.as_str()));
            match module {
                Some(m) => host.settings.set_module_setting(&m, &key, parsed),
                None => host.settings.set(&key, parsed),
            }
            host.settings.save().await?;
        }
        SettingsAction::Reset => {
            host.settings.reset().await?;
            host.notifier.show_success("设置", "已恢复默认值");
        }
        SettingsAction::Path => println!("{}", host.settings.path().display()),
    }
    Ok(())
}

async fn elevate(host: &Host) -> Result<()> {
    match host.bridge.restart_as_administrator().await {
        Ok(RestartOutcome::AlreadyElevated) => {
            host.notifier.show_info("提权", "当前已是管理员");
            Ok(())
        }
        Ok(RestartOutcome::HandedOff) => {
            info!("已移交给提权实例，当前进程退出");
            host.shutdown().await?;
            std::process::exit(0);
        }
        Ok(RestartOutcome::Declined) => {
            host.notifier.show_info("提权", "用户拒绝了提权，继续以当前权限运行");
            Ok(())
        }
        Err(e) => {
            report_failure(host.notifier.as_ref(), &e);
            Err(e.into())
        }
    }
}

async fn doctor(host: &Host) -> Result<()> {
    let summary = tokio::task::spawn_blocking(system::collect_summary)
        .await
        .context("系统信息采集任务失败")?;
    println!("管理员权限: {}", if host.bridge.is_elevated() { "是" } else { "否" });
    println!("设置文件: {}", host.settings.path().display());
    println!("交换目录: {}", host.bridge.config().exchange_dir.display());
    println!(
        "系统: {} {}（内核 {}，主机 {}）",
        summary.os_name, summary.os_version, summary.kernel_version, summary.host_name
    );
    println!(
        "CPU: {} 核，内存: {} / {} MiB",
        summary.cpu_count,
        summary.used_memory / 1024 / 1024,
        summary.total_memory / 1024 / 1024
    );

    for d in host.registry.discover() {
        if !d.enabled {
            println!("模块 {}: 已禁用", d.name);
            continue;
        }
        if let Err(e) = host.registry.initialize(&d.name).await {
            warn!("模块初始化失败: {}: {e}", d.name);
        }
        let usable = host.registry.can_execute(&d.name).await;
        let state = host.registry.state(&d.name).map(|s| format!("{s:?}")).unwrap_or_default();
        println!(
            "模块 {}: 状态 {state}，{}{}",
            d.name,
            if usable { "可用" } else { "不可用" },
            host.registry
                .last_error(&d.name)
                .map(|e| format!("（{e}）"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// 提权助手模式：执行单条请求并写出响应。
///
/// 说明：
/// - 日志写入 `--diagnostics` 指定的文件，发起方在助手异常退出时读取
/// - 助手只读设置，从不保存
async fn run_helper(cli: &Cli) -> Result<()> {
    let invocation = HelperInvocation {
        request: cli.request.clone().ok_or_else(|| anyhow!("缺少 --request"))?,
        response: cli.response.clone().ok_or_else(|| anyhow!("缺少 --response"))?,
        diagnostics: cli.diagnostics.clone().ok_or_else(|| anyhow!("缺少 --diagnostics"))?,
    };
    init_helper_logging(&invocation.diagnostics)?;
    info!("提权助手启动: {}", invocation.request.display());

    let settings_path = match &cli.settings {
        Some(p) => p.clone(),
        None => paths::default_settings_file()?,
    };
    let host = Host::build(
        settings_path,
        Duration::from_secs(cli.elevation_timeout_secs),
        Vec::new(),
        Arc::new(SilentNotifier),
    )
    .await?;

    let result = serve_request(&invocation, host.registry.as_ref()).await;
    host.registry.cleanup_all().await;
    if let Err(e) = &result {
        error!("提权助手失败: {e:#}");
    }
    result
}

/// 将 `LoggingLevel` 设置映射为 `EnvFilter` 指令。
fn filter_directive(logging_level: &str) -> &'static str {
    match logging_level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warning" | "warn" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

/// 从设置文件中预读 `LoggingLevel`（日志初始化早于设置加载）。
fn configured_level(path: &Path) -> String {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .and_then(|v| v.get(keys::LOGGING_LEVEL)?.as_str().map(str::to_string))
        .unwrap_or_else(|| "Information".to_string())
}

fn init_logging(logging_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(logging_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn init_helper_logging(diagnostics: &Path) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(diagnostics)
        .with_context(|| format!("打开诊断日志失败: {}", diagnostics.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}
