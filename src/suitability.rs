//! Decides whether an instance shape is recommended for local-storage workloads.
//!
//! Everything here is a pure function of already characterized attributes;
//! the provider instances gather the inputs and log the warnings.

use serde::Serialize;

/// Highest accepted total-local-disk to RAM ratio (GB:GB).
pub const MAX_DISK_TO_RAM_RATIO: f64 = 105.0;

/// CPU count required once an instance carries this many local disks.
pub const MANY_DISKS: usize = 16;

/// Minimum CPUs for [`MANY_DISKS`] or more.
pub const MANY_DISKS_MIN_CPUS: usize = 32;

/// Highest accepted CPU to RAM ratio (vCPU:GB), i.e. at least 2 GB per vCPU.
pub const MAX_CPU_TO_RAM_RATIO: f64 = 0.5;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Class membership of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassCheck {
    /// On the explicit denylist.
    pub unsupported: bool,
    /// On the allow-list.
    pub supported: bool,
}

/// Characterized shape of an instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shape {
    /// Numeric size token of the instance type (vCPUs on GCP), 0 when absent.
    pub instance_size: u32,
    pub cpu_count: usize,
    pub memory_gb: f64,
    pub disk_count: usize,
    /// Size of the first local disk, 0 when missing or undersized.
    pub first_disk_size_gb: f64,
}

/// Outcome of an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Verdict {
    pub recommended: bool,
    pub warnings: Vec<String>,
}

impl Verdict {
    fn accept() -> Self {
        Self {
            recommended: true,
            warnings: Vec::new(),
        }
    }

    fn reject(warning: impl Into<String>) -> Self {
        Self {
            recommended: false,
            warnings: vec![warning.into()],
        }
    }
}

/// Class-only evaluation: supported and not denied.
pub fn evaluate_class(check: ClassCheck) -> Verdict {
    if check.unsupported {
        return Verdict::reject("Instance class is explicitly unsupported for local disk tuning.");
    }
    if !check.supported {
        return Verdict::reject("Instance class is not supported for local disk tuning.");
    }
    Verdict::accept()
}

/// Full evaluation of class, size, CPU:RAM, disk count and disk:RAM ratio.
pub fn evaluate_shape(check: ClassCheck, shape: &Shape) -> Verdict {
    let verdict = evaluate_class(check);
    if !verdict.recommended {
        return verdict;
    }
    if shape.instance_size <= 1 {
        return Verdict::reject("Single vCPU instance sizes are not recommended.");
    }
    if shape.cpu_count as f64 / shape.memory_gb >= MAX_CPU_TO_RAM_RATIO {
        return Verdict::reject("At least 2G of RAM per CPU is needed. Performance will suffer.");
    }
    if shape.disk_count >= MANY_DISKS && shape.cpu_count < MANY_DISKS_MIN_CPUS {
        return Verdict::reject(format!(
            "This machine doesn't have enough CPUs for allocated number of NVMEs \
             (at least {MANY_DISKS_MIN_CPUS} cpus for >={MANY_DISKS} disks). Performance will suffer."
        ));
    }
    if shape.disk_count < 1 {
        return Verdict::reject("No ephemeral disks were found.");
    }
    let ratio = disk_to_ram_ratio(shape);
    if ratio > MAX_DISK_TO_RAM_RATIO {
        return Verdict::reject(format!(
            "Instance disk-to-RAM ratio is {ratio}, which is higher than the recommended \
             ratio {MAX_DISK_TO_RAM_RATIO}. Performance may suffer."
        ));
    }
    Verdict::accept()
}

/// Total local disk GB per GB of RAM.
pub fn disk_to_ram_ratio(shape: &Shape) -> f64 {
    (shape.disk_count as f64 * shape.first_disk_size_gb) / shape.memory_gb
}

/// Disk size in GB, or 0 when below the provider's minimum physical slice.
pub fn effective_disk_size_gb(size_bytes: u64, min_gb: f64) -> f64 {
    let size_gb = size_bytes as f64 / GIB;
    if size_gb >= min_gb {
        size_gb
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPPORTED: ClassCheck = ClassCheck {
        unsupported: false,
        supported: true,
    };

    fn shape(cpu_count: usize, memory_gb: f64, disk_count: usize, disk_gb: f64) -> Shape {
        Shape {
            instance_size: cpu_count as u32,
            cpu_count,
            memory_gb,
            disk_count,
            first_disk_size_gb: disk_gb,
        }
    }

    #[test]
    fn test_recommended_n2_standard_2() {
        let verdict = evaluate_shape(SUPPORTED, &shape(2, 8.0, 2, 375.0));
        assert!(verdict.recommended);
        assert!(verdict.warnings.is_empty());
        assert_eq!(disk_to_ram_ratio(&shape(2, 8.0, 2, 375.0)), 93.75);
    }

    #[test]
    fn test_denylist_wins_over_allow_list() {
        let check = ClassCheck {
            unsupported: true,
            supported: true,
        };
        assert!(!evaluate_shape(check, &shape(8, 64.0, 2, 375.0)).recommended);
        assert!(!evaluate_class(check).recommended);
    }

    #[test]
    fn test_unsupported_class() {
        let check = ClassCheck {
            unsupported: false,
            supported: false,
        };
        assert!(!evaluate_shape(check, &shape(8, 64.0, 2, 375.0)).recommended);
    }

    #[test]
    fn test_single_vcpu_rejected() {
        let mut single = shape(1, 4.0, 1, 375.0);
        single.instance_size = 1;
        assert!(!evaluate_shape(SUPPORTED, &single).recommended);
    }

    #[test]
    fn test_cpu_ram_ratio_rejects_regardless_of_disks() {
        for disk_count in [0, 1, 4, 24] {
            let verdict = evaluate_shape(SUPPORTED, &shape(8, 8.0, disk_count, 375.0));
            assert!(!verdict.recommended);
            assert!(verdict.warnings[0].contains("2G of RAM per CPU"));
        }
        assert!(!evaluate_shape(SUPPORTED, &shape(4, 8.0, 1, 375.0)).recommended);
    }

    #[test]
    fn test_many_disks_need_many_cpus() {
        let verdict = evaluate_shape(SUPPORTED, &shape(16, 128.0, 20, 375.0));
        assert!(!verdict.recommended);
        assert!(verdict.warnings[0].contains("enough CPUs"));

        assert!(evaluate_shape(SUPPORTED, &shape(32, 128.0, 20, 375.0)).recommended);

        let verdict = evaluate_shape(SUPPORTED, &shape(32, 64.0, 20, 375.0));
        assert!(!verdict.recommended);
        assert!(verdict.warnings[0].contains("disk-to-RAM"));
    }

    #[test]
    fn test_no_disks_rejected() {
        let verdict = evaluate_shape(SUPPORTED, &shape(4, 16.0, 0, 0.0));
        assert!(!verdict.recommended);
        assert_eq!(verdict.warnings, vec!["No ephemeral disks were found."]);
    }

    #[test]
    fn test_disk_to_ram_ceiling() {
        let verdict = evaluate_shape(SUPPORTED, &shape(2, 4.0, 2, 375.0));
        assert!(!verdict.recommended);
        assert!(verdict.warnings[0].contains("disk-to-RAM ratio is 187.5"));
    }

    #[test]
    fn test_effective_disk_size() {
        let gib = 1024 * 1024 * 1024;
        assert_eq!(effective_disk_size_gb(375 * gib, 375.0), 375.0);
        assert_eq!(effective_disk_size_gb(374 * gib, 375.0), 0.0);
        assert_eq!(effective_disk_size_gb(0, 375.0), 0.0);
    }

    #[test]
    fn test_class_only_evaluation() {
        assert!(evaluate_class(SUPPORTED).recommended);
    }
}
