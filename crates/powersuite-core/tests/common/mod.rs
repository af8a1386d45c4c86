#![allow(dead_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use powersuite_core::elevation::{
    complete_handshake, BridgeConfig, ElevatedProcess, ElevationBridge, ElevationPlatform, HelperExit,
    LaunchOutcome,
};
use powersuite_core::helper::{serve_request, CommandDispatcher};
use powersuite_core::ipc::{ElevatedRequest, ElevatedResponse, HelperInvocation, HANDSHAKE_FLAG};
use powersuite_core::notify::Notifier;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 假助手进程在被启动后的行为。
#[derive(Clone)]
pub enum Behavior {
    /// 在进程内执行 `serve_request`，退出码 0。
    Serve,
    /// 永不退出。
    Hang,
    /// 用户在系统提示中拒绝。
    Decline,
    /// 写诊断文件后以指定退出码结束。
    Exit { code: i32, stderr: String, diagnostics: String },
    /// 写出一个 request_id 不匹配的响应。
    WrongId,
    /// 系统提权提示一直未被回应，启动调用本身不返回。
    PromptOpen,
}

pub struct FakePlatform {
    pub elevated: AtomicBool,
    pub behavior: Mutex<Behavior>,
    pub launches: AtomicUsize,
    pub killed: Arc<AtomicBool>,
    pub last_args: Mutex<Vec<OsString>>,
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl FakePlatform {
    pub fn new(behavior: Behavior, dispatcher: Arc<dyn CommandDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            elevated: AtomicBool::new(false),
            behavior: Mutex::new(behavior),
            launches: AtomicUsize::new(0),
            killed: Arc::new(AtomicBool::new(false)),
            last_args: Mutex::new(Vec::new()),
            dispatcher,
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ElevationPlatform for FakePlatform {
    fn is_elevated(&self) -> anyhow::Result<bool> {
        Ok(self.elevated.load(Ordering::SeqCst))
    }

    async fn launch_elevated(&self, _exe: &Path, args: &[OsString]) -> anyhow::Result<LaunchOutcome> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock() = args.to_vec();
        let behavior = self.behavior.lock().clone();
        match behavior {
            Behavior::Decline => return Ok(LaunchOutcome::Declined),
            Behavior::PromptOpen => std::future::pending::<()>().await,
            _ => {}
        }

        if let Some(pos) = args.iter().position(|a| a == HANDSHAKE_FLAG) {
            let handshake = PathBuf::from(&args[pos + 1]);
            let handle = tokio::spawn(async move {
                complete_handshake(&handshake).await.expect("write handshake");
                std::future::pending::<HelperExit>().await
            });
            return Ok(started(handle, self.killed.clone()));
        }

        let invocation = HelperInvocation::from_args(args).expect("helper args");
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            match behavior {
                Behavior::Serve => {
                    let code = match serve_request(&invocation, dispatcher.as_ref()).await {
                        Ok(()) => 0,
                        Err(_) => 1,
                    };
                    HelperExit {
                        code: Some(code),
                        stderr: String::new(),
                    }
                }
                Behavior::Hang | Behavior::Decline | Behavior::PromptOpen => std::future::pending::<HelperExit>().await,
                Behavior::Exit {
                    code,
                    stderr,
                    diagnostics,
                } => {
                    tokio::fs::write(&invocation.diagnostics, diagnostics)
                        .await
                        .expect("write diagnostics");
                    HelperExit {
                        code: Some(code),
                        stderr,
                    }
                }
                Behavior::WrongId => {
                    let raw = tokio::fs::read(&invocation.request).await.expect("read request");
                    let request: ElevatedRequest = serde_json::from_slice(&raw).expect("parse request");
                    let response = ElevatedResponse::Ok {
                        request_id: Uuid::new_v4(),
                        payload: request.payload,
                    };
                    tokio::fs::write(&invocation.response, serde_json::to_vec(&response).unwrap())
                        .await
                        .expect("write response");
                    HelperExit {
                        code: Some(0),
                        stderr: String::new(),
                    }
                }
            }
        });
        Ok(started(handle, self.killed.clone()))
    }
}

fn started(handle: JoinHandle<HelperExit>, killed: Arc<AtomicBool>) -> LaunchOutcome {
    LaunchOutcome::Started(Box::new(FakeProcess { handle, killed }))
}

struct FakeProcess {
    handle: JoinHandle<HelperExit>,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl ElevatedProcess for FakeProcess {
    async fn wait(&mut self) -> anyhow::Result<HelperExit> {
        Ok((&mut self.handle).await?)
    }

    fn kill(&mut self) {
        self.handle.abort();
        self.killed.store(true, Ordering::SeqCst);
    }
}

pub fn bridge(dir: &Path, platform: Arc<FakePlatform>, timeout: Duration) -> ElevationBridge {
    let config = BridgeConfig::new(PathBuf::from("powersuite-host"), dir.join("exchange"))
        .with_timeout(timeout)
        .with_handshake_timeout(timeout);
    ElevationBridge::new(platform, config)
}

/// 记录所有提示的通知实现；确认结果可配置。
#[derive(Default)]
pub struct RecordingNotifier {
    pub decline: AtomicBool,
    pub confirms: AtomicUsize,
    pub infos: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn show_success(&self, _title: &str, _message: &str) {}

    fn show_info(&self, _title: &str, message: &str) {
        self.infos.lock().push(message.to_string());
    }

    fn show_warning(&self, _title: &str, _message: &str) {}

    fn show_error(&self, _title: &str, message: &str) {
        self.errors.lock().push(message.to_string());
    }

    async fn confirm(&self, _title: &str, _message: &str, _default_yes: bool) -> bool {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        !self.decline.load(Ordering::SeqCst)
    }

    async fn prompt(&self, _title: &str, _message: &str, default_value: &str) -> Option<String> {
        Some(default_value.to_string())
    }
}
