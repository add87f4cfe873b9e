//! GCP instance: metadata server access, local SSD discovery and suitability.

use std::collections::BTreeSet;

use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::client::MetadataClient;
use crate::config::Config;
use crate::devices::{self, DiskInventory, RootMount, SystemPaths};
use crate::error::CloudError;
use crate::host::HostResources;
use crate::io_setup::InstanceProfile;
use crate::provider::CloudProvider;
use crate::providers::{cached_host, host_cell, resolve, type_token};
use crate::suitability::{self, ClassCheck, Shape, Verdict};

/// Instance metadata path.
const INSTANCE_PATH: &str = "/computeMetadata/v1/instance/";

/// Required header for GCP metadata requests.
const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";

/// Required header value for GCP metadata requests.
const METADATA_FLAVOR_VALUE: &str = "Google";

const HEADERS: &[(&str, &str)] = &[(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE)];

/// Classes supported for local NVMe tuning.
pub const SUPPORTED_CLASSES: &[&str] = &["n1", "n2", "n2d", "c2"];

/// Classes without usable local NVMe.
pub const UNSUPPORTED_CLASSES: &[&str] = &["e2", "f1", "g1", "m2", "m1"];

/// The one m1 shape that does support local SSDs.
pub const M1_EXCEPTION: &str = "m1-megamem-96";

/// GCP slices 3TB physical devices into 375GB local SSDs (2020 hardware);
/// anything smaller is misconfigured.
pub const MIN_LOCAL_DISK_GB: f64 = 375.0;

/// Check whether we're running on GCP.
///
/// The metadata hostname must resolve to the link-local address, and a
/// GCP-only field must answer, which rules out other platforms sharing the IP.
pub async fn probe(config: &Config) -> bool {
    let addrs = resolve(&config.gcp_dns_name).await;
    if !addrs
        .iter()
        .any(|addr| addr.is_ipv4() && *addr == config.link_local_addr)
    {
        return false;
    }

    let client = match MetadataClient::new(
        config.timeout,
        &config.gcp_base_url,
        config.detection_retry,
    ) {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client
        .fetch(&instance_url(client.base_url(), "machine-type", false), HEADERS)
        .await
    {
        Ok(_) => true,
        Err(err) => {
            debug!(error = %err, "GCP machine-type probe failed");
            false
        }
    }
}

fn instance_url(base_url: &str, path: &str, recursive: bool) -> String {
    format!("{base_url}{INSTANCE_PATH}{path}?recursive={recursive}")
}

/// Allow/deny membership for a machine type such as `n2-standard-2`.
pub fn class_check(instance_type: &str) -> ClassCheck {
    if instance_type == M1_EXCEPTION {
        return ClassCheck {
            unsupported: false,
            supported: true,
        };
    }
    let class = type_token(instance_type, '-', 0);
    ClassCheck {
        unsupported: UNSUPPORTED_CLASSES.contains(&class),
        supported: SUPPORTED_CLASSES.contains(&class),
    }
}

#[derive(Debug, Deserialize)]
struct AttachedDisk {
    #[serde(default)]
    interface: String,
}

/// Number of NVMe disks in a `disks/?recursive=true` listing.
fn count_nvme_disks(listing: &str) -> Result<usize, CloudError> {
    let disks: Vec<AttachedDisk> = serde_json::from_str(listing)?;
    Ok(disks.iter().filter(|disk| disk.interface == "NVME").count())
}

/// A GCE virtual machine.
#[derive(Debug)]
pub struct GcpInstance {
    client: MetadataClient,
    paths: SystemPaths,
    max_size: Option<usize>,
    instance_type: OnceCell<String>,
    host: OnceCell<HostResources>,
    disks: OnceCell<DiskInventory>,
    disk_count: OnceCell<usize>,
    first_disk_size_gb: OnceCell<f64>,
}

impl GcpInstance {
    pub fn new(config: &Config) -> Result<Self, CloudError> {
        Ok(Self {
            client: MetadataClient::new(config.timeout, &config.gcp_base_url, config.retry)?,
            paths: config.paths.clone(),
            max_size: config.max_size,
            instance_type: OnceCell::new(),
            host: host_cell(None),
            disks: OnceCell::new(),
            disk_count: OnceCell::new(),
            first_disk_size_gb: OnceCell::new(),
        })
    }

    /// Use these resources instead of probing the OS.
    pub fn with_host_resources(mut self, host: HostResources) -> Self {
        self.host = host_cell(Some(host));
        self
    }

    async fn metadata(&self, path: &str, recursive: bool) -> Result<String, CloudError> {
        let url = instance_url(self.client.base_url(), path, recursive);
        self.client.fetch_text(&url, HEADERS).await
    }

    /// Machine type, e.g. `n2-standard-2`.
    pub async fn instance_type(&self) -> Result<&str, CloudError> {
        let machine_type = self
            .instance_type
            .get_or_try_init(|| async {
                let full = self.metadata("machine-type", false).await?;
                // projects/<id>/machineTypes/<type>
                Ok::<_, CloudError>(full.rsplit('/').next().unwrap_or_default().to_string())
            })
            .await?;
        Ok(machine_type)
    }

    /// e.g. `n2`
    pub async fn instance_class(&self) -> Result<String, CloudError> {
        Ok(type_token(self.instance_type().await?, '-', 0).to_string())
    }

    /// e.g. `standard`
    pub async fn instance_purpose(&self) -> Result<String, CloudError> {
        Ok(type_token(self.instance_type().await?, '-', 1).to_string())
    }

    /// vCPU token, e.g. `2`, or `0` for shared-core types like `e2-micro`.
    pub async fn instance_size(&self) -> Result<String, CloudError> {
        let size = type_token(self.instance_type().await?, '-', 2);
        Ok(if size.is_empty() { "0" } else { size }.to_string())
    }

    pub async fn host(&self) -> HostResources {
        cached_host(&self.host).await
    }

    pub async fn disks(&self) -> Result<&DiskInventory, CloudError> {
        self.disks
            .get_or_try_init(|| async { devices::scan_inventory(&self.paths, RootMount::Optional) })
            .await
    }

    /// Local SSDs, the root disk excluded.
    pub async fn local_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        Ok(self.disks().await?.local.clone())
    }

    /// Persistent disks, the root disk excluded.
    pub async fn remote_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        Ok(self.disks().await?.remote.clone())
    }

    async fn nvme_count_from_metadata(&self) -> usize {
        let listing = match self.metadata("disks", true).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, "Problem when fetching disks from metadata");
                return 0;
            }
        };
        count_nvme_disks(&listing).unwrap_or_else(|err| {
            warn!(error = %err, "Problem when parsing disks from metadata");
            0
        })
    }

    /// Local NVMe disks usable for the data RAID: the smaller of what the OS
    /// sees and what the metadata server lists.
    pub async fn disk_count(&self) -> usize {
        *self
            .disk_count
            .get_or_init(|| async {
                let os_count = match self.disks().await {
                    Ok(disks) => disks.local.len(),
                    Err(err) => {
                        warn!(error = %err, "Problem when parsing disks from OS");
                        0
                    }
                };
                os_count.min(self.nvme_count_from_metadata().await)
            })
            .await
    }

    /// Size of the first local disk in GB, 0 if there is none or it is
    /// smaller than [`MIN_LOCAL_DISK_GB`].
    pub async fn first_disk_size_gb(&self) -> f64 {
        *self
            .first_disk_size_gb
            .get_or_init(|| async {
                let first = match self.disks().await {
                    Ok(disks) => disks.local.iter().next().cloned(),
                    Err(_) => None,
                };
                let Some(first) = first else {
                    return 0.0;
                };
                match devices::device_size_bytes(&self.paths, &first) {
                    Ok(bytes) => {
                        let size = suitability::effective_disk_size_gb(bytes, MIN_LOCAL_DISK_GB);
                        if size == 0.0 {
                            warn!(disk = %first, "First nvme is smaller than lowest expected size.");
                        }
                        size
                    }
                    Err(err) => {
                        warn!(disk = %first, error = %err, "Could not measure first nvme");
                        0.0
                    }
                }
            })
            .await
    }

    pub async fn is_unsupported_class(&self) -> Result<bool, CloudError> {
        Ok(class_check(self.instance_type().await?).unsupported)
    }

    pub async fn is_supported_class(&self) -> Result<bool, CloudError> {
        Ok(class_check(self.instance_type().await?).supported)
    }

    /// Full suitability evaluation. Disks are only inspected once the class
    /// itself qualifies.
    pub async fn recommendation(&self) -> Result<Verdict, CloudError> {
        let check = class_check(self.instance_type().await?);
        let verdict = suitability::evaluate_class(check);
        if !verdict.recommended {
            return Ok(verdict);
        }

        let host = self.host().await;
        let shape = Shape {
            instance_size: self.instance_size().await?.parse().unwrap_or(0),
            cpu_count: host.cpu_count,
            memory_gb: host.memory_gb(),
            disk_count: self.disk_count().await,
            first_disk_size_gb: self.first_disk_size_gb().await,
        };
        Ok(suitability::evaluate_shape(check, &shape))
    }

    pub async fn private_ipv4(&self) -> Result<String, CloudError> {
        self.metadata("network-interfaces/0/ip", false).await
    }

    /// Instance `user-data` attribute, empty when unset.
    pub async fn user_data(&self) -> Result<String, CloudError> {
        let url = instance_url(self.client.base_url(), "attributes/user-data", false);
        match self.client.fetch_limited(&url, HEADERS, self.max_size).await {
            Ok(body) => String::from_utf8(body).map_err(|_| CloudError::Utf8),
            Err(err) if err.is_http() => Ok(String::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn profile(&self) -> Result<InstanceProfile, CloudError> {
        Ok(InstanceProfile {
            provider: CloudProvider::Gcp,
            instance_type: self.instance_type().await?.to_string(),
            instance_class: self.instance_class().await?,
            instance_size: self.instance_size().await?,
            host: self.host().await,
            disks: self.disks().await?.clone(),
            disk_count: self.disk_count().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_url() {
        assert_eq!(
            instance_url("http://localhost:8080", "disks", true),
            "http://localhost:8080/computeMetadata/v1/instance/disks?recursive=true"
        );
        assert_eq!(
            instance_url("http://localhost:8080", "machine-type", false),
            "http://localhost:8080/computeMetadata/v1/instance/machine-type?recursive=false"
        );
    }

    #[test]
    fn test_class_check() {
        assert_eq!(
            class_check("n2-standard-2"),
            ClassCheck {
                unsupported: false,
                supported: true
            }
        );
        assert!(class_check("e2-standard-4").unsupported);
        assert!(!class_check("e2-standard-4").supported);
        assert!(!class_check("t2d-standard-4").supported);
    }

    #[test]
    fn test_m1_exception() {
        let megamem = class_check("m1-megamem-96");
        assert!(megamem.supported);
        assert!(!megamem.unsupported);

        let ultramem = class_check("m1-ultramem-40");
        assert!(ultramem.unsupported);
        assert!(!ultramem.supported);
    }

    #[test]
    fn test_count_nvme_disks() {
        let listing = r#"[
            {"deviceName": "boot", "interface": "SCSI", "type": "PERSISTENT"},
            {"deviceName": "local-ssd-0", "interface": "NVME", "type": "LOCAL"},
            {"deviceName": "local-ssd-1", "interface": "NVME", "type": "LOCAL"},
            {"deviceName": "odd"}
        ]"#;
        assert_eq!(count_nvme_disks(listing).unwrap(), 2);
    }

    #[test]
    fn test_count_nvme_disks_malformed() {
        assert!(count_nvme_disks("not json").is_err());
        assert!(count_nvme_disks(r#"{"interface": "NVME"}"#).is_err());
    }
}
