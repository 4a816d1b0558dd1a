// src/supervisor/telemetry.rs

use sysinfo::System;
use tracing::info;

/// Logs host memory once per poll cycle.
pub struct MemoryTelemetry {
    system: System,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh and log `free_memory` / `total_memory` in bytes.
    pub fn log_memory(&mut self) -> (u64, u64) {
        self.system.refresh_memory();
        let free = self.system.free_memory();
        let total = self.system.total_memory();
        info!(free_memory = free, total_memory = total, "memory");
        (free, total)
    }
}

impl Default for MemoryTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
