/// Resource limits for one interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Python frames allowed on the call stack before `RecursionError`.
    pub max_call_depth: usize,
    /// Instructions executed before the run is aborted; `None` is unlimited.
    pub max_steps: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_steps: None,
        }
    }
}
