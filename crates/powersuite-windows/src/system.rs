//! 系统信息采集（操作系统、CPU、内存、进程）。
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, ProcessRefreshKind, RefreshKind, System};

/// 系统概要。
///
/// 字段说明：
/// - 内存单位为字节
/// - 无法获取的文本字段为空字符串
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub host_name: String,
    pub cpu_count: usize,
    pub total_memory: u64,
    pub used_memory: u64,
    pub process_count: usize,
    pub uptime_secs: u64,
}

/// 采集系统概要。
pub fn collect_summary() -> SystemSummary {
    let system = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::new())
            .with_memory(MemoryRefreshKind::everything())
            .with_processes(ProcessRefreshKind::new()),
    );
    SystemSummary {
        os_name: System::name().unwrap_or_default(),
        os_version: System::os_version().unwrap_or_default(),
        kernel_version: System::kernel_version().unwrap_or_default(),
        host_name: System::host_name().unwrap_or_default(),
        cpu_count: system.cpus().len(),
        total_memory: system.total_memory(),
        used_memory: system.used_memory(),
        process_count: system.processes().len(),
        uptime_secs: System::uptime(),
    }
}

/// 判断指定可执行文件名的进程是否正在运行（忽略大小写，不比较路径）。
///
/// 限制：
/// - 无法区分不同路径下的同名进程
pub fn is_process_running(exe_name: &str) -> bool {
    let needle = exe_name.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return false;
    }
    let mut system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    system.refresh_processes();
    system
        .processes()
        .values()
        .any(|p| p.name().to_ascii_lowercase() == needle)
}
