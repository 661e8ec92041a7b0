use crate::runtime::vm::VmConfig;

/// Knobs shared by the generator, the code generator and new executions.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerConfig {
    /// Warp loop iterations between wall-clock deadline checks.
    pub deadline_check_interval: u32,
    /// Emit the warp deadline fail-safe at all.
    pub warp_timer: bool,
    pub vm: VmConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            deadline_check_interval: 16,
            warp_timer: true,
            vm: VmConfig::default(),
        }
    }
}

impl CompilerConfig {
    pub fn with_deadline_check_interval(mut self, interval: u32) -> Self {
        self.deadline_check_interval = interval.max(1);
        self
    }

    pub fn with_warp_timer(mut self, enabled: bool) -> Self {
        self.warp_timer = enabled;
        self
    }

    pub fn with_vm(mut self, vm: VmConfig) -> Self {
        self.vm = vm;
        self
    }
}
