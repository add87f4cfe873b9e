//! AWS instance: IMDS access (v2 token when available), NVMe and EBS discovery.

use std::collections::BTreeSet;

use reqwest::Method;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::MetadataClient;
use crate::config::Config;
use crate::devices::{self, DiskInventory, RootMount, SystemPaths, EBS_MODEL};
use crate::error::CloudError;
use crate::host::HostResources;
use crate::io_setup::InstanceProfile;
use crate::provider::CloudProvider;
use crate::providers::{cached_host, host_cell, type_token};
use crate::suitability::{self, ClassCheck, Verdict};

/// AWS metadata root, used for detection.
const LATEST_PATH: &str = "/latest/";

/// AWS meta-data path.
const META_DATA_PATH: &str = "/latest/meta-data/";

/// AWS user-data endpoint path.
const USER_DATA_PATH: &str = "/latest/user-data";

/// AWS IMDSv2 token endpoint path.
const TOKEN_PATH: &str = "/latest/api/token";

/// Token TTL header name.
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

/// Token TTL requested for a session.
const TOKEN_TTL_SECONDS: &str = "21600";

/// Token header name for requests.
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Instance classes with local NVMe/SSD storage we support.
pub const SUPPORTED_CLASSES: &[&str] = &[
    "i2", "i3", "i3en", "c5d", "m5d", "m5ad", "r5d", "z1d", "c6gd", "m6gd", "r6gd", "x2gd",
    "im4gn", "is4gen",
];

/// Classes whose network interface uses the Intel 82599 VF driver.
const IXGBEVF_CLASSES: &[&str] = &["c3", "c4", "d2", "i2", "r3"];

/// Classes whose network interface uses the Elastic Network Adapter.
const ENA_CLASSES: &[&str] = &[
    "a1", "c5", "c5a", "c5d", "c5n", "c6g", "c6gd", "f1", "g3", "g4", "h1", "i3", "i3en", "inf1",
    "m5", "m5a", "m5ad", "m5d", "m5dn", "m5n", "m6g", "m6gd", "p2", "p3", "r4", "r5", "r5a",
    "r5ad", "r5b", "r5d", "r5dn", "r5n", "t3", "t3a", "u-6tb1", "u-9tb1", "u-12tb1", "u-18tn1",
    "u-24tb1", "x1", "x1e", "z1d", "t4g", "r6g", "r6gd", "x2gd", "im4gn", "is4gen",
];

/// Check whether we're running on AWS with a short bounded-retry call to
/// the metadata root.
pub async fn probe(config: &Config) -> bool {
    let client = match MetadataClient::new(
        config.timeout,
        &config.aws_base_url,
        config.detection_retry,
    ) {
        Ok(client) => client,
        Err(_) => return false,
    };
    let token = match request_token(&client).await {
        Ok(token) => token,
        Err(err) => {
            debug!(error = %err, "AWS token probe failed");
            return false;
        }
    };
    let url = format!("{}{}", client.base_url(), LATEST_PATH);
    match client.fetch(&url, &token_headers(&token)).await {
        Ok(_) => true,
        Err(err) => {
            debug!(error = %err, "AWS metadata probe failed");
            false
        }
    }
}

/// Get an IMDSv2 token, or `None` when the service only speaks IMDSv1.
async fn request_token(client: &MetadataClient) -> Result<Option<String>, CloudError> {
    let url = format!("{}{}", client.base_url(), TOKEN_PATH);
    match client
        .send(Method::PUT, &url, &[(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)])
        .await
    {
        Ok(response) => Ok(Some(response.text().await?)),
        Err(err) if err.is_http() => Ok(None),
        Err(err) => Err(err),
    }
}

fn token_headers(token: &Option<String>) -> Vec<(&'static str, &str)> {
    token
        .as_deref()
        .map(|token| vec![(TOKEN_HEADER, token)])
        .unwrap_or_default()
}

/// `sdb` -> `xvdb`, the name Xen guests see for a mapped device.
pub fn xenify(device: &str) -> String {
    device.replace("sd", "xvd")
}

/// Mapping category of a block-device-mapping entry: `ephemeral0` -> `ephemeral`.
fn mapping_kind(entry: &str) -> &str {
    let end = entry
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(entry.len());
    &entry[..end]
}

pub fn class_check(instance_type: &str) -> ClassCheck {
    let class = type_token(instance_type, '.', 0);
    ClassCheck {
        unsupported: false,
        supported: SUPPORTED_CLASSES.contains(&class),
    }
}

/// Network driver for an instance type, `None` when unknown.
pub fn en_interface_type(instance_type: &str) -> Option<&'static str> {
    let class = type_token(instance_type, '.', 0);
    let size = type_token(instance_type, '.', 1);
    if IXGBEVF_CLASSES.contains(&class) {
        return Some("ixgbevf");
    }
    if ENA_CLASSES.contains(&class) {
        return Some("ena");
    }
    if class == "m4" {
        return Some(if size == "16xlarge" { "ena" } else { "ixgbevf" });
    }
    None
}

/// An EC2 instance.
#[derive(Debug)]
pub struct AwsInstance {
    client: MetadataClient,
    paths: SystemPaths,
    max_size: Option<usize>,
    token: OnceCell<Option<String>>,
    instance_type: OnceCell<String>,
    host: OnceCell<HostResources>,
    disks: OnceCell<DiskInventory>,
}

impl AwsInstance {
    pub fn new(config: &Config) -> Result<Self, CloudError> {
        Ok(Self {
            client: MetadataClient::new(config.timeout, &config.aws_base_url, config.retry)?,
            paths: config.paths.clone(),
            max_size: config.max_size,
            token: OnceCell::new(),
            instance_type: OnceCell::new(),
            host: host_cell(None),
            disks: OnceCell::new(),
        })
    }

    /// Use these resources instead of probing the OS.
    pub fn with_host_resources(mut self, host: HostResources) -> Self {
        self.host = host_cell(Some(host));
        self
    }

    async fn token(&self) -> Result<&Option<String>, CloudError> {
        self.token
            .get_or_try_init(|| request_token(&self.client))
            .await
    }

    async fn metadata(&self, path: &str) -> Result<String, CloudError> {
        let token = self.token().await?;
        let url = format!("{}{}{}", self.client.base_url(), META_DATA_PATH, path);
        self.client.fetch_text(&url, &token_headers(token)).await
    }

    /// Instance type, e.g. `i3.16xlarge`.
    pub async fn instance_type(&self) -> Result<&str, CloudError> {
        let instance_type = self
            .instance_type
            .get_or_try_init(|| self.metadata("instance-type"))
            .await?;
        Ok(instance_type)
    }

    /// e.g. `i3`
    pub async fn instance_class(&self) -> Result<String, CloudError> {
        Ok(type_token(self.instance_type().await?, '.', 0).to_string())
    }

    /// e.g. `16xlarge`
    pub async fn instance_size(&self) -> Result<String, CloudError> {
        Ok(type_token(self.instance_type().await?, '.', 1).to_string())
    }

    pub async fn host(&self) -> HostResources {
        cached_host(&self.host).await
    }

    /// Disks from the OS NVMe scan merged with the block-device-mapping.
    pub async fn disks(&self) -> Result<&DiskInventory, CloudError> {
        self.disks.get_or_try_init(|| self.populate_disks()).await
    }

    async fn populate_disks(&self) -> Result<DiskInventory, CloudError> {
        let root = devices::root_devices(&self.paths, RootMount::Single)?;
        let mut local = BTreeSet::new();
        let mut remote = BTreeSet::new();

        // Instance-store and EBS volumes share the nvmeN naming; the model tells them apart.
        for name in devices::list_devices(&self.paths, devices::nvme_pattern())? {
            if devices::is_in_root_devs(&name, &root) {
                continue;
            }
            let Some(controller) = devices::nvme_controller(&name) else {
                continue;
            };
            if devices::nvme_model(&self.paths, controller)? == EBS_MODEL {
                remote.insert(name);
            } else {
                local.insert(name);
            }
        }

        let nvme_ephemeral_present = !local.is_empty();
        let mapping = self.metadata("block-device-mapping/").await?;
        for entry in mapping.lines().map(str::trim).filter(|e| !e.is_empty()) {
            let target = match mapping_kind(entry) {
                "ephemeral" if nvme_ephemeral_present => continue,
                "ephemeral" => &mut local,
                "ebs" => &mut remote,
                // ami and root describe the root volume
                _ => continue,
            };
            let mapped = self
                .metadata(&format!("block-device-mapping/{entry}"))
                .await?;
            let device = xenify(mapped.trim());
            let device = device.trim_start_matches("/dev/");
            if !devices::device_exists(&self.paths, device) || devices::is_in_root_devs(device, &root)
            {
                debug!(%entry, %device, "mapped device not present, skipping");
                continue;
            }
            target.insert(device.to_string());
        }

        Ok(DiskInventory {
            root: root.into_iter().collect(),
            local,
            remote,
        })
    }

    /// Ephemeral disks, standard SSDs and NVMe.
    pub async fn local_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        Ok(self.disks().await?.local.clone())
    }

    /// EBS volumes.
    pub async fn remote_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        Ok(self.disks().await?.remote.clone())
    }

    /// The full path of the root partition, e.g. `/dev/xvda1`.
    pub async fn root_device(&self) -> Result<BTreeSet<String>, CloudError> {
        Ok(self.disks().await?.root.clone())
    }

    /// The disk holding the root partition, e.g. `xvda`.
    pub async fn root_disk(&self) -> Result<Option<String>, CloudError> {
        Ok(self
            .disks()
            .await?
            .root
            .iter()
            .next()
            .map(|root| devices::disk_name(root)))
    }

    /// Every attached disk but root.
    pub async fn non_root_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        let disks = self.disks().await?;
        Ok(disks.local.union(&disks.remote).cloned().collect())
    }

    /// Disk names of every device, root included.
    pub async fn all_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        let disks = self.disks().await?;
        Ok(disks
            .root
            .iter()
            .chain(disks.local.iter())
            .chain(disks.remote.iter())
            .map(|device| devices::disk_name(device))
            .collect())
    }

    /// Metadata is authoritative for mapped devices, so there is nothing to
    /// reconcile: the count is every non-root disk found.
    pub async fn disk_count(&self) -> Result<usize, CloudError> {
        Ok(self.non_root_disks().await?.len())
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

    pub async fn en_interface_type(&self) -> Result<Option<&'static str>, CloudError> {
        Ok(en_interface_type(self.instance_type().await?))
    }

    pub async fn public_ipv4(&self) -> Result<String, CloudError> {
        self.metadata("public-ipv4").await
    }

    pub async fn private_ipv4(&self) -> Result<String, CloudError> {
        self.metadata("local-ipv4").await
    }

    /// Whether `nic` is attached to a VPC.
    pub async fn is_vpc_enabled(&self, nic: &str) -> Result<bool, CloudError> {
        let mac = devices::mac_address(&self.paths, nic)?;
        let listing = self
            .metadata(&format!("network/interfaces/macs/{mac}/"))
            .await?;
        Ok(listing.lines().any(|line| line.trim() == "vpc-id"))
    }

    /// Raw user-data. AWS always serves this path, so errors are real errors.
    pub async fn user_data(&self) -> Result<String, CloudError> {
        let token = self.token().await?;
        let url = format!("{}{}", self.client.base_url(), USER_DATA_PATH);
        let body = self
            .client
            .fetch_limited(&url, &token_headers(token), self.max_size)
            .await?;
        String::from_utf8(body).map_err(|_| CloudError::Utf8)
    }

    pub async fn profile(&self) -> Result<InstanceProfile, CloudError> {
        Ok(InstanceProfile {
            provider: CloudProvider::Aws,
            instance_type: self.instance_type().await?.to_string(),
            instance_class: self.instance_class().await?,
            instance_size: self.instance_size().await?,
            host: self.host().await,
            disks: self.disks().await?.clone(),
            disk_count: self.disk_count().await?,
        })
    }
}
