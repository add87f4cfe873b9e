//! Azure instance: IMDS access, Lsv2 NVMe discovery and customData decoding.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::client::MetadataClient;
use crate::config::Config;
use crate::devices::{self, DiskInventory, RootMount, SystemPaths};
use crate::error::CloudError;
use crate::host::HostResources;
use crate::io_setup::InstanceProfile;
use crate::provider::CloudProvider;
use crate::providers::{cached_host, host_cell, resolve, type_token};
use crate::suitability::{self, ClassCheck, Verdict};

/// Azure instance metadata base path.
const INSTANCE_PATH: &str = "/metadata/instance";

/// API version query parameter.
const API_VERSION: &str = "2021-01-01";

/// Required header for Azure metadata requests.
const METADATA_HEADER: &str = "Metadata";

/// Required header value for Azure metadata requests.
const METADATA_VALUE: &str = "True";

const HEADERS: &[(&str, &str)] = &[(METADATA_HEADER, METADATA_VALUE)];

/// Local NVMe disks per Lsv2 class. IMDS storageProfile does not list them.
pub const LSV2_DISK_COUNT: &[(&str, usize)] = &[
    ("L8s", 1),
    ("L16s", 2),
    ("L32s", 4),
    ("L48s", 6),
    ("L64s", 8),
    ("L80s", 10),
];

/// Check whether we're running on Azure: the metadata hostname resolves.
pub async fn probe(config: &Config) -> bool {
    !resolve(&config.azure_dns_name).await.is_empty()
}

fn instance_url(base_url: &str, path: &str) -> String {
    format!("{base_url}{INSTANCE_PATH}{path}?api-version={API_VERSION}&format=text")
}

/// Known local disk count for a class, 0 outside the Lsv2 family.
pub fn lsv2_disk_count(class: &str) -> usize {
    LSV2_DISK_COUNT
        .iter()
        .find(|(name, _)| *name == class)
        .map(|(_, count)| *count)
        .unwrap_or(0)
}

pub fn class_check(instance_type: &str) -> ClassCheck {
    let class = type_token(instance_type, '_', 1);
    ClassCheck {
        unsupported: false,
        supported: LSV2_DISK_COUNT.iter().any(|(name, _)| *name == class),
    }
}

/// vCPU digits of a class name: `L8s` -> `8`.
fn class_vcpus(class: &str) -> String {
    class.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// An Azure virtual machine.
#[derive(Debug)]
pub struct AzureInstance {
    client: MetadataClient,
    paths: SystemPaths,
    max_size: Option<usize>,
    instance_type: OnceCell<String>,
    location: OnceCell<String>,
    zone: OnceCell<String>,
    host: OnceCell<HostResources>,
    disks: OnceCell<DiskInventory>,
    disk_count: OnceCell<usize>,
}

impl AzureInstance {
    pub fn new(config: &Config) -> Result<Self, CloudError> {
        Ok(Self {
            client: MetadataClient::new(config.timeout, &config.azure_base_url, config.retry)?,
            paths: config.paths.clone(),
            max_size: config.max_size,
            instance_type: OnceCell::new(),
            location: OnceCell::new(),
            zone: OnceCell::new(),
            host: host_cell(None),
            disks: OnceCell::new(),
            disk_count: OnceCell::new(),
        })
    }

    /// Use these resources instead of probing the OS.
    pub fn with_host_resources(mut self, host: HostResources) -> Self {
        self.host = host_cell(Some(host));
        self
    }

    async fn metadata(&self, path: &str) -> Result<String, CloudError> {
        let url = instance_url(self.client.base_url(), path);
        self.client.fetch_text(&url, HEADERS).await
    }

    async fn cached<'a>(
        &self,
        cell: &'a OnceCell<String>,
        path: &str,
    ) -> Result<&'a str, CloudError> {
        let value = cell.get_or_try_init(|| self.metadata(path)).await?;
        Ok(value)
    }

    /// VM size, e.g. `Standard_L8s_v2`.
    pub async fn instance_type(&self) -> Result<&str, CloudError> {
        self.cached(&self.instance_type, "/compute/vmSize").await
    }

    /// Region, e.g. `eastus`.
    pub async fn location(&self) -> Result<&str, CloudError> {
        self.cached(&self.location, "/compute/location").await
    }

    /// Availability zone, e.g. `1`.
    pub async fn zone(&self) -> Result<&str, CloudError> {
        self.cached(&self.zone, "/compute/zone").await
    }

    /// e.g. `Standard`
    pub async fn instance_purpose(&self) -> Result<String, CloudError> {
        Ok(type_token(self.instance_type().await?, '_', 0).to_string())
    }

    /// e.g. `L8s`
    pub async fn instance_class(&self) -> Result<String, CloudError> {
        Ok(type_token(self.instance_type().await?, '_', 1).to_string())
    }

    /// vCPU count encoded in the class, e.g. `8` for `L8s`.
    pub async fn instance_size(&self) -> Result<String, CloudError> {
        Ok(class_vcpus(&self.instance_class().await?))
    }

    pub async fn host(&self) -> HostResources {
        cached_host(&self.host).await
    }

    pub async fn disks(&self) -> Result<&DiskInventory, CloudError> {
        self.disks
            .get_or_try_init(|| async { devices::scan_inventory(&self.paths, RootMount::Single) })
            .await
    }

    pub async fn local_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        Ok(self.disks().await?.local.clone())
    }

    pub async fn remote_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        Ok(self.disks().await?.remote.clone())
    }

    /// The smaller of the OS-visible local disks and the class's known count.
    pub async fn disk_count(&self) -> Result<usize, CloudError> {
        let class = self.instance_class().await?;
        let count = self
            .disk_count
            .get_or_init(|| async {
                let os_count = match self.disks().await {
                    Ok(disks) => disks.local.len(),
                    Err(err) => {
                        warn!(error = %err, "Problem when parsing disks from OS");
                        0
                    }
                };
                os_count.min(lsv2_disk_count(&class))
            })
            .await;
        Ok(*count)
    }

    pub async fn is_unsupported_class(&self) -> Result<bool, CloudError> {
        Ok(class_check(self.instance_type().await?).unsupported)
    }

    pub async fn is_supported_class(&self) -> Result<bool, CloudError> {
        Ok(class_check(self.instance_type().await?).supported)
    }

    pub async fn recommendation(&self) -> Result<Verdict, CloudError> {
        Ok(suitability::evaluate_class(class_check(
            self.instance_type().await?,
        )))
    }

    pub async fn private_ipv4(&self) -> Result<String, CloudError> {
        self.metadata("/network/interface/0/ipv4/ipAddress/0/privateIpAddress")
            .await
    }

    /// Decoded `customData`, empty when none was provided.
    pub async fn user_data(&self) -> Result<String, CloudError> {
        let url = instance_url(self.client.base_url(), "/compute/customData");
        // base64 expands data by 4/3, plus padding
        let max_encoded_size = self.max_size.map(|max| max.saturating_mul(4) / 3 + 4);
        let b64_bytes = match self
            .client
            .fetch_limited(&url, HEADERS, max_encoded_size)
            .await
        {
            Ok(body) => body,
            Err(err) if err.is_http() => return Ok(String::new()),
            Err(err) => return Err(err),
        };

        let b64 = String::from_utf8(b64_bytes).map_err(|_| CloudError::Utf8)?;
        let b64 = b64.trim();
        if b64.is_empty() {
            return Ok(String::new());
        }

        let decoded = STANDARD.decode(b64).map_err(|_| CloudError::Base64)?;
        if let Some(max) = self.max_size {
            if decoded.len() > max {
                return Err(CloudError::TooLarge(decoded.len(), max));
            }
        }
        String::from_utf8(decoded).map_err(|_| CloudError::Utf8)
    }

    pub async fn profile(&self) -> Result<InstanceProfile, CloudError> {
        Ok(InstanceProfile {
            provider: CloudProvider::Azure,
            instance_type: self.instance_type().await?.to_string(),
            instance_class: self.instance_class().await?,
            instance_size: self.instance_size().await?,
            host: self.host().await,
            disks: self.disks().await?.clone(),
            disk_count: self.disk_count().await?,
        })
    }
}
