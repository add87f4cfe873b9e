//! Block device discovery from the OS view: `/dev`, the mount table and sysfs.
//!
//! Every path is taken from [`SystemPaths`], so the whole view can be rooted in
//! a scratch directory.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::CloudError;

/// Model string AWS reports for network-backed NVMe volumes.
pub const EBS_MODEL: &str = "Amazon Elastic Block Store";

/// Generic name some kernels report for the root block device.
const ROOT_ALIAS: &str = "/dev/root";

/// Locations of the OS interfaces the prober reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    pub dev: PathBuf,
    pub mounts: PathBuf,
    pub mountinfo: PathBuf,
    pub sys_dev_block: PathBuf,
    pub sys_class_nvme: PathBuf,
    pub sys_class_net: PathBuf,
}

impl SystemPaths {
    /// The usual layout, relocated under `root`.
    pub fn rooted(root: &Path) -> Self {
        Self {
            dev: root.join("dev"),
            mounts: root.join("proc/self/mounts"),
            mountinfo: root.join("proc/self/mountinfo"),
            sys_dev_block: root.join("sys/dev/block"),
            sys_class_nvme: root.join("sys/class/nvme"),
            sys_class_net: root.join("sys/class/net"),
        }
    }

    /// Absolute path of a device given as `xvdb` or `/dev/xvdb`.
    pub fn device_path(&self, device: &str) -> PathBuf {
        self.dev.join(device.trim_start_matches("/dev/"))
    }
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self::rooted(Path::new("/"))
    }
}

/// How many devices a provider accepts at `/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootMount {
    /// Exactly one.
    Single,
    /// Zero or one.
    Optional,
}

/// Disks split by role. Local and remote hold bare device names (`nvme0n1`),
/// root holds the mounted device path (`/dev/nvme0n1p1`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskInventory {
    pub root: BTreeSet<String>,
    pub local: BTreeSet<String>,
    pub remote: BTreeSet<String>,
}

/// Result of a single prober pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedDisks {
    pub root: Vec<String>,
    pub local_candidates: BTreeSet<String>,
}

/// NVMe namespaces, e.g. `nvme0n1`.
pub fn nvme_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(nvme\d+)n\d+$").unwrap())
}

/// Non-boot SCSI disks, e.g. `sdb`.
pub fn persistent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^sd[b-z]+$").unwrap())
}

/// Classify root and local candidates.
///
/// Candidates are `/dev` entries matching `local_pattern` that are not a
/// prefix of any root device, which drops the disk holding the root partition.
pub fn probe(
    paths: &SystemPaths,
    local_pattern: &Regex,
    policy: RootMount,
) -> Result<ProbedDisks, CloudError> {
    let root = root_devices(paths, policy)?;
    let local_candidates = list_devices(paths, local_pattern)?
        .into_iter()
        .filter(|name| !is_in_root_devs(name, &root))
        .collect();
    Ok(ProbedDisks {
        root,
        local_candidates,
    })
}

/// Inventory for providers where every NVMe namespace is local and `sd[b-z]`
/// disks are network-attached.
pub fn scan_inventory(paths: &SystemPaths, policy: RootMount) -> Result<DiskInventory, CloudError> {
    let probed = probe(paths, nvme_pattern(), policy)?;
    let remote = list_devices(paths, persistent_pattern())?
        .into_iter()
        .filter(|name| !is_in_root_devs(name, &probed.root))
        .collect();
    Ok(DiskInventory {
        root: probed.root.into_iter().collect(),
        local: probed.local_candidates,
        remote,
    })
}

/// Devices mounted at `/`, checked against `policy`.
pub fn root_devices(paths: &SystemPaths, policy: RootMount) -> Result<Vec<String>, CloudError> {
    let mounts = fs::read_to_string(&paths.mounts)?;
    let mut roots: Vec<String> = Vec::new();
    for line in mounts.lines() {
        let mut parts = line.split_whitespace();
        let (Some(device), Some(mount_point)) = (parts.next(), parts.next()) else {
            continue;
        };
        if mount_point != "/" || !device.starts_with("/dev/") {
            continue;
        }
        let device = if device == ROOT_ALIAS {
            resolve_root_alias(paths).unwrap_or_else(|| {
                warn!("could not resolve {ROOT_ALIAS} to a block device");
                device.to_string()
            })
        } else {
            device.to_string()
        };
        if !roots.contains(&device) {
            roots.push(device);
        }
    }

    let found = roots.len();
    match policy {
        RootMount::Single if found != 1 => Err(CloudError::AmbiguousRootMount { found }),
        RootMount::Optional if found > 1 => Err(CloudError::AmbiguousRootMount { found }),
        _ => Ok(roots),
    }
}

/// Find the real device behind `/dev/root` via mountinfo's major:minor.
fn resolve_root_alias(paths: &SystemPaths) -> Option<String> {
    let mountinfo = fs::read_to_string(&paths.mountinfo).ok()?;
    // Later lines shadow earlier mounts on the same point.
    let dev_id = mountinfo
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match (fields.get(2), fields.get(4)) {
                (Some(dev_id), Some(&"/")) => Some(dev_id.to_string()),
                _ => None,
            }
        })
        .last()?;
    let uevent = fs::read_to_string(paths.sys_dev_block.join(dev_id).join("uevent")).ok()?;
    uevent
        .lines()
        .find_map(|line| line.strip_prefix("DEVNAME="))
        .map(|name| format!("/dev/{}", name.trim()))
}

/// `/dev` entries whose name matches `pattern`.
pub fn list_devices(paths: &SystemPaths, pattern: &Regex) -> Result<BTreeSet<String>, CloudError> {
    let mut found = BTreeSet::new();
    for entry in fs::read_dir(&paths.dev)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if pattern.is_match(name) {
                found.insert(name.to_string());
            }
        }
    }
    Ok(found)
}

/// Whether `name` is the disk (or a prefix of the partition) backing a root device.
pub fn is_in_root_devs(name: &str, root_devs: &[String]) -> bool {
    let dev_path = format!("/dev/{}", name.trim_start_matches("/dev/"));
    root_devs.iter().any(|root| root.starts_with(&dev_path))
}

/// Whether `device` exists under the configured `/dev`.
pub fn device_exists(paths: &SystemPaths, device: &str) -> bool {
    paths.device_path(device).exists()
}

/// NVMe controller of a namespace: `nvme1n1` -> `nvme1`.
pub fn nvme_controller(name: &str) -> Option<&str> {
    nvme_pattern()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Model string the kernel reports for an NVMe controller.
pub fn nvme_model(paths: &SystemPaths, controller: &str) -> io::Result<String> {
    let model = fs::read_to_string(paths.sys_class_nvme.join(controller).join("model"))?;
    Ok(model.trim().to_string())
}

/// Size of a device in bytes, measured by seeking to its end.
pub fn device_size_bytes(paths: &SystemPaths, device: &str) -> io::Result<u64> {
    let mut file = File::open(paths.device_path(device))?;
    file.seek(SeekFrom::End(0))
}

/// MAC address of a network interface.
pub fn mac_address(paths: &SystemPaths, nic: &str) -> io::Result<String> {
    let address = fs::read_to_string(paths.sys_class_net.join(nic).join("address"))?;
    Ok(address.trim().to_string())
}

/// Disk name without `/dev/` or partition suffix: `/dev/xvda1` -> `xvda`,
/// `nvme0n1p2` -> `nvme0n1`.
pub fn disk_name(device: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"^(nvme\d+n\d+|[a-zA-Z]+)").unwrap());
    let name = device.trim_start_matches("/dev/");
    pattern
        .find(name)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn fake_host(mounts: &str, devices: &[&str]) -> (tempfile::TempDir, SystemPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = SystemPaths::rooted(dir.path());
        fs::create_dir_all(&paths.dev).unwrap();
        for device in devices {
            touch(&paths.dev.join(device));
        }
        fs::create_dir_all(paths.mounts.parent().unwrap()).unwrap();
        fs::write(&paths.mounts, mounts).unwrap();
        (dir, paths)
    }

    #[test]
    fn test_default_paths() {
        let paths = SystemPaths::default();
        assert_eq!(paths.dev, PathBuf::from("/dev"));
        assert_eq!(paths.mounts, PathBuf::from("/proc/self/mounts"));
        assert_eq!(paths.sys_class_nvme, PathBuf::from("/sys/class/nvme"));
    }

    #[test]
    fn test_device_path_accepts_both_forms() {
        let paths = SystemPaths::default();
        assert_eq!(paths.device_path("xvdb"), PathBuf::from("/dev/xvdb"));
        assert_eq!(paths.device_path("/dev/xvdb"), PathBuf::from("/dev/xvdb"));
    }

    #[test]
    fn test_patterns() {
        assert!(nvme_pattern().is_match("nvme0n1"));
        assert!(nvme_pattern().is_match("nvme12n3"));
        assert!(!nvme_pattern().is_match("nvme0n1p1"));
        assert!(!nvme_pattern().is_match("nvme0"));
        assert!(persistent_pattern().is_match("sdb"));
        assert!(!persistent_pattern().is_match("sda"));
        assert!(!persistent_pattern().is_match("sdb1"));
    }

    #[test]
    fn test_root_on_nvme_is_excluded() {
        let (_dir, paths) = fake_host(
            "/dev/nvme0n1p1 / ext4 rw 0 0\nproc /proc proc rw 0 0\n",
            &["nvme0n1", "nvme0n1p1", "nvme1n1", "nvme2n1", "sda"],
        );
        let probed = probe(&paths, nvme_pattern(), RootMount::Single).unwrap();
        assert_eq!(probed.root, vec!["/dev/nvme0n1p1".to_string()]);
        assert_eq!(
            probed.local_candidates.into_iter().collect::<Vec<_>>(),
            vec!["nvme1n1", "nvme2n1"]
        );
    }

    #[test]
    fn test_scan_inventory_is_disjoint() {
        let (_dir, paths) = fake_host(
            "/dev/sda1 / ext4 rw 0 0\n",
            &["sda", "sda1", "sdb", "sdc", "nvme0n1", "nvme1n1"],
        );
        let inventory = scan_inventory(&paths, RootMount::Single).unwrap();
        assert_eq!(inventory.root.len(), 1);
        assert_eq!(inventory.local.len(), 2);
        assert_eq!(
            inventory.remote.iter().cloned().collect::<Vec<_>>(),
            vec!["sdb", "sdc"]
        );
        assert!(inventory.local.is_disjoint(&inventory.remote));
        for name in inventory.local.iter().chain(inventory.remote.iter()) {
            assert!(!inventory.root.contains(&format!("/dev/{name}")));
        }
    }

    #[test]
    fn test_single_root_policy() {
        let (_dir, paths) = fake_host(
            "/dev/sda1 / ext4 rw 0 0\n/dev/sdb1 / xfs rw 0 0\n",
            &["sda", "sdb"],
        );
        let result = root_devices(&paths, RootMount::Single);
        assert!(matches!(
            result,
            Err(CloudError::AmbiguousRootMount { found: 2 })
        ));

        let (_dir, paths) = fake_host("overlay / overlay rw 0 0\n", &[]);
        let result = root_devices(&paths, RootMount::Single);
        assert!(matches!(
            result,
            Err(CloudError::AmbiguousRootMount { found: 0 })
        ));
    }

    #[test]
    fn test_optional_root_policy() {
        let (_dir, paths) = fake_host("overlay / overlay rw 0 0\n", &["nvme0n1"]);
        let probed = probe(&paths, nvme_pattern(), RootMount::Optional).unwrap();
        assert!(probed.root.is_empty());
        assert_eq!(probed.local_candidates.len(), 1);
    }

    #[test]
    fn test_duplicate_root_entries_count_once() {
        let (_dir, paths) = fake_host(
            "/dev/sda1 / ext4 rw 0 0\n/dev/sda1 / ext4 rw 0 0\n",
            &["sda"],
        );
        let roots = root_devices(&paths, RootMount::Single).unwrap();
        assert_eq!(roots, vec!["/dev/sda1".to_string()]);
    }

    #[test]
    fn test_root_alias_resolution() {
        let (_dir, paths) = fake_host("/dev/root / ext4 rw 0 0\n", &["xvda", "xvda1"]);
        fs::write(
            &paths.mountinfo,
            "22 1 202:1 / / rw,relatime shared:1 - ext4 /dev/root rw\n",
        )
        .unwrap();
        let uevent = paths.sys_dev_block.join("202:1").join("uevent");
        fs::create_dir_all(uevent.parent().unwrap()).unwrap();
        fs::write(&uevent, "MAJOR=202\nMINOR=1\nDEVNAME=xvda1\nDEVTYPE=partition\n").unwrap();

        let roots = root_devices(&paths, RootMount::Single).unwrap();
        assert_eq!(roots, vec!["/dev/xvda1".to_string()]);
    }

    #[test]
    fn test_unresolved_root_alias_is_kept() {
        let (_dir, paths) = fake_host("/dev/root / ext4 rw 0 0\n", &[]);
        let roots = root_devices(&paths, RootMount::Single).unwrap();
        assert_eq!(roots, vec!["/dev/root".to_string()]);
    }

    #[test]
    fn test_is_in_root_devs() {
        let roots = vec!["/dev/nvme0n1p1".to_string()];
        assert!(is_in_root_devs("nvme0n1", &roots));
        assert!(is_in_root_devs("/dev/nvme0n1", &roots));
        assert!(!is_in_root_devs("nvme1n1", &roots));
    }

    #[test]
    fn test_nvme_controller() {
        assert_eq!(nvme_controller("nvme3n1"), Some("nvme3"));
        assert_eq!(nvme_controller("sdb"), None);
    }

    #[test]
    fn test_nvme_model_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SystemPaths::rooted(dir.path());
        let model = paths.sys_class_nvme.join("nvme1").join("model");
        fs::create_dir_all(model.parent().unwrap()).unwrap();
        fs::write(&model, "Amazon Elastic Block Store              \n").unwrap();
        assert_eq!(nvme_model(&paths, "nvme1").unwrap(), EBS_MODEL);
    }

    #[test]
    fn test_device_size_by_seek() {
        let (_dir, paths) = fake_host("", &[]);
        let file = File::create(paths.dev.join("nvme0n1")).unwrap();
        file.set_len(4096).unwrap();
        assert_eq!(device_size_bytes(&paths, "nvme0n1").unwrap(), 4096);
        assert!(device_size_bytes(&paths, "nvme9n1").is_err());
    }

    #[test]
    fn test_disk_name() {
        assert_eq!(disk_name("/dev/xvda1"), "xvda");
        assert_eq!(disk_name("xvdb"), "xvdb");
        assert_eq!(disk_name("nvme0n1p2"), "nvme0n1");
        assert_eq!(disk_name("/dev/nvme1n1"), "nvme1n1");
    }
}
