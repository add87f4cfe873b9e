//! CPU and memory of the running host.

use serde::Serialize;
use sysinfo::System;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Compute and memory resources as seen by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostResources {
    /// Logical CPUs.
    pub cpu_count: usize,
    pub memory_bytes: u64,
}

impl HostResources {
    pub fn new(cpu_count: usize, memory_bytes: u64) -> Self {
        Self {
            cpu_count,
            memory_bytes,
        }
    }

    /// Read the current host's resources.
    pub fn probe() -> Self {
        let system = System::new_all();
        Self {
            cpu_count: system.cpus().len(),
            memory_bytes: system.total_memory(),
        }
    }

    pub fn memory_gb(&self) -> f64 {
        self.memory_bytes as f64 / GIB
    }
}
