//! 内置模块注册表。
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use powersuite_core::module::{Module, ModuleTable};
use powersuite_core::OperationResult;

pub mod firewall;
pub mod system_info;

/// 组装宿主内置的全部模块。
pub fn module_table() -> OperationResult<ModuleTable> {
    let mut table = ModuleTable::new();
    table.register(system_info::descriptor(), || {
        Box::new(system_info::SystemInfoModule::default()) as Box<dyn Module>
    })?;
    table.register(firewall::descriptor(), || {
        Box::new(firewall::FirewallModule::default()) as Box<dyn Module>
    })?;
    Ok(table)
}
