//! 提权/权限相关：检测当前是否为管理员，并以管理员身份启动进程。
//!
//! 说明：
//! - [`OsElevation`] 实现 [`ElevationPlatform`]，供核心提权桥使用
//! - Windows 下通过 `ShellExecuteExW` 的 `runas` 动词触发 UAC 提示；用户取消对应 `ERROR_CANCELLED`
//! - 类 Unix 下通过 `pkexec` 启动；`pkexec` 以 126 退出表示用户取消认证
//!
//! 安全注意：
//! - 该检测仅用于决定“是否需要经提权助手执行”，不能作为完整的安全边界
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::ffi::OsString;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use powersuite_core::elevation::{ElevationPlatform, LaunchOutcome};

/// 操作系统提供的提权能力。
#[derive(Debug, Clone, Copy, Default)]
pub struct OsElevation;

impl OsElevation {
    pub fn new() -> Self {
        Self
    }
}

/// 判断当前进程是否以管理员权限运行。
///
/// 返回值：
/// - `Ok(true)`：当前为管理员（类 Unix 下为 root）
pub fn is_running_as_admin() -> Result<bool> {
    imp::is_running_as_admin()
}

#[async_trait]
impl ElevationPlatform for OsElevation {
    fn is_elevated(&self) -> Result<bool> {
        is_running_as_admin()
    }

    async fn launch_elevated(&self, exe: &Path, args: &[OsString]) -> Result<LaunchOutcome> {
        imp::launch_elevated(exe, args).await
    }

    fn is_declined_exit(&self, code: i32) -> bool {
        imp::is_declined_exit(code)
    }
}

/// 按 Windows 命令行解析规则（`CommandLineToArgvW`）转义单个参数。
pub fn quote_windows_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '\u{b}', '"']) {
        return arg.to_string();
    }
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes * 2));
    out.push('"');
    out
}

/// 拼接为一条 Windows 命令行参数串。
pub fn join_windows_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| quote_windows_arg(&a.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(windows)]
mod imp {
    use std::ffi::OsString;
    use std::path::Path;
    use std::time::Duration;

    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use powersuite_core::elevation::{ElevatedProcess, HelperExit, LaunchOutcome};
    use tracing::warn;
    use windows::core::{w, HSTRING, PCWSTR};
    use windows::Win32::Foundation::{CloseHandle, ERROR_CANCELLED, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
    use windows::Win32::System::Threading::{GetExitCodeProcess, TerminateProcess, WaitForSingleObject};
    use windows::Win32::UI::Shell::{
        IsUserAnAdmin, ShellExecuteExW, SEE_MASK_NOASYNC, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW,
    };
    use windows::Win32::UI::WindowsAndMessaging::SW_HIDE;

    use super::join_windows_args;

    const EXIT_POLL: Duration = Duration::from_millis(100);

    pub fn is_running_as_admin() -> Result<bool> {
        unsafe { Ok(IsUserAnAdmin().as_bool()) }
    }

    pub fn is_declined_exit(_code: i32) -> bool {
        false
    }

    /// UAC 提示期间 `ShellExecuteExW` 会一直阻塞，因此放到阻塞线程池中执行。
    pub async fn launch_elevated(exe: &Path, args: &[OsString]) -> Result<LaunchOutcome> {
        let exe = exe.to_path_buf();
        let params = join_windows_args(args);
        let launched = tokio::task::spawn_blocking(move || shell_execute_runas(&exe, &params))
            .await
            .context("提权启动线程异常结束")??;
        Ok(match launched {
            Some(handle) => LaunchOutcome::Started(Box::new(handle)),
            None => LaunchOutcome::Declined,
        })
    }

    /// 返回 `None` 表示用户在 UAC 提示中取消。
    fn shell_execute_runas(exe: &Path, params: &str) -> Result<Option<ProcessHandle>> {
        let file = HSTRING::from(exe.as_os_str());
        let params = HSTRING::from(params);
        let mut info = SHELLEXECUTEINFOW {
            cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
            fMask: SEE_MASK_NOCLOSEPROCESS | SEE_MASK_NOASYNC,
            lpVerb: w!("runas"),
            lpFile: PCWSTR(file.as_ptr()),
            lpParameters: PCWSTR(params.as_ptr()),
            nShow: SW_HIDE.0,
            ..Default::default()
        };

        match unsafe { ShellExecuteExW(&mut info) } {
            Ok(()) => {}
            Err(e) if e.code() == ERROR_CANCELLED.to_hresult() => return Ok(None),
            Err(e) => return Err(e).context("ShellExecuteExW(runas) 失败"),
        }
        if info.hProcess.is_invalid() {
            return Err(anyhow!("ShellExecuteExW 未返回进程句柄"));
        }
        Ok(Some(ProcessHandle(info.hProcess)))
    }

    /// 提权进程句柄（离开作用域时关闭）。
    struct ProcessHandle(HANDLE);

    // 进程句柄可在线程间转移；所有访问都经过 `&mut self`。
    unsafe impl Send for ProcessHandle {}

    impl ProcessHandle {
        fn poll_exit(&self) -> Result<Option<i32>> {
            let state = unsafe { WaitForSingleObject(self.0, 0) };
            if state == WAIT_TIMEOUT {
                return Ok(None);
            }
            if state != WAIT_OBJECT_0 {
                return Err(anyhow!("WaitForSingleObject 返回异常状态: {:?}", state));
            }
            let mut code = 0u32;
            unsafe { GetExitCodeProcess(self.0, &mut code) }.context("GetExitCodeProcess 失败")?;
            Ok(Some(code as i32))
        }
    }

    #[async_trait]
    impl ElevatedProcess for ProcessHandle {
        async fn wait(&mut self) -> Result<HelperExit> {
            loop {
                if let Some(code) = self.poll_exit()? {
                    // runas 启动无法重定向 stderr；诊断信息由助手写入诊断文件。
                    return Ok(HelperExit {
                        code: Some(code),
                        stderr: String::new(),
                    });
                }
                tokio::time::sleep(EXIT_POLL).await;
            }
        }

        fn kill(&mut self) {
            if let Err(e) = unsafe { TerminateProcess(self.0, 1) } {
                warn!("终止提权进程失败: {e}");
            }
        }
    }

    impl Drop for ProcessHandle {
        fn drop(&mut self) {
            let _ = unsafe { CloseHandle(self.0) };
        }
    }
}

#[cfg(unix)]
mod imp {
    use std::ffi::OsString;
    use std::path::Path;
    use std::process::Stdio;

    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use powersuite_core::elevation::{ElevatedProcess, HelperExit, LaunchOutcome};
    use tokio::io::AsyncReadExt;
    use tokio::process::{Child, Command};
    use tokio::task::JoinHandle;
    use tracing::warn;

    /// `pkexec`：用户取消或认证失败。
    const PKEXEC_DISMISSED: i32 = 126;

    pub fn is_running_as_admin() -> Result<bool> {
        Ok(unsafe { libc::geteuid() } == 0)
    }

    pub fn is_declined_exit(code: i32) -> bool {
        code == PKEXEC_DISMISSED
    }

    pub async fn launch_elevated(exe: &Path, args: &[OsString]) -> Result<LaunchOutcome> {
        let mut command = Command::new("pkexec");
        command.arg(exe).args(args);
        let process = spawn_monitored(command).context("启动 pkexec 失败")?;
        Ok(LaunchOutcome::Started(Box::new(process)))
    }

    /// 启动子进程，并在后台持续读取其 stderr（避免管道写满后子进程阻塞）。
    fn spawn_monitored(mut command: Command) -> Result<PkexecProcess> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf).await;
                buf
            })
        });
        Ok(PkexecProcess { child, stderr })
    }

    struct PkexecProcess {
        child: Child,
        stderr: Option<JoinHandle<String>>,
    }

    #[async_trait]
    impl ElevatedProcess for PkexecProcess {
        async fn wait(&mut self) -> Result<HelperExit> {
            let status = self.child.wait().await.context("等待 pkexec 失败")?;
            let stderr = match self.stderr.as_mut() {
                Some(reader) => reader.await.unwrap_or_default(),
                None => String::new(),
            };
            self.stderr = None;
            Ok(HelperExit {
                code: status.code(),
                stderr,
            })
        }

        fn kill(&mut self) {
            if let Err(e) = self.child.start_kill() {
                warn!("终止 pkexec 进程失败: {e}");
            }
        }
    }

}
