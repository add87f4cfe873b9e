//! CloudInstance enum and provider dispatch.

use std::collections::BTreeSet;

use tracing::warn;

use crate::config::Config;
use crate::detect::detect_provider;
use crate::error::CloudError;
use crate::host::HostResources;
use crate::io_setup::{self, InstanceProfile, IoSetup};
use crate::provider::CloudProvider;
use crate::providers::aws::AwsInstance;
use crate::providers::azure::AzureInstance;
use crate::providers::gcp::GcpInstance;
use crate::suitability::Verdict;

/// The instance this process runs on.
///
/// Attributes are fetched on first use and cached for the lifetime of the
/// value; re-create it to observe a changed disk topology.
///
/// # Example
///
/// ```ignore
/// use cloud_instance::{CloudInstance, CloudError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), CloudError> {
///     let instance = CloudInstance::detect().await?;
///     println!("{} {}", instance.provider(), instance.instance_type().await?);
///     println!("local disks: {:?}", instance.local_disks().await?);
///     println!("recommended: {}", instance.is_recommended().await?);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub enum CloudInstance {
    Aws(AwsInstance),
    Gcp(GcpInstance),
    Azure(AzureInstance),
}

impl CloudInstance {
    /// Detect the provider with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::UnknownProvider` if no cloud provider is detected.
    pub async fn detect() -> Result<Self, CloudError> {
        Self::detect_with_config(&Config::default()).await
    }

    /// Detect the provider using custom endpoints and paths.
    pub async fn detect_with_config(config: &Config) -> Result<Self, CloudError> {
        let provider = detect_provider(config).await?;
        Self::for_provider(provider, config)
    }

    /// Skip detection and build the instance for a known provider.
    pub fn for_provider(provider: CloudProvider, config: &Config) -> Result<Self, CloudError> {
        Ok(match provider {
            CloudProvider::Aws => CloudInstance::Aws(AwsInstance::new(config)?),
            CloudProvider::Gcp => CloudInstance::Gcp(GcpInstance::new(config)?),
            CloudProvider::Azure => CloudInstance::Azure(AzureInstance::new(config)?),
        })
    }

    /// Use these resources instead of probing the OS.
    pub fn with_host_resources(self, host: HostResources) -> Self {
        match self {
            CloudInstance::Aws(i) => CloudInstance::Aws(i.with_host_resources(host)),
            CloudInstance::Gcp(i) => CloudInstance::Gcp(i.with_host_resources(host)),
            CloudInstance::Azure(i) => CloudInstance::Azure(i.with_host_resources(host)),
        }
    }

    pub fn provider(&self) -> CloudProvider {
        match self {
            CloudInstance::Aws(_) => CloudProvider::Aws,
            CloudInstance::Gcp(_) => CloudProvider::Gcp,
            CloudInstance::Azure(_) => CloudProvider::Azure,
        }
    }

    /// Raw provider type string, e.g. `n2-standard-2`, `i3.16xlarge`, `Standard_L8s_v2`.
    pub async fn instance_type(&self) -> Result<&str, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.instance_type().await,
            CloudInstance::Gcp(i) => i.instance_type().await,
            CloudInstance::Azure(i) => i.instance_type().await,
        }
    }

    pub async fn instance_class(&self) -> Result<String, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.instance_class().await,
            CloudInstance::Gcp(i) => i.instance_class().await,
            CloudInstance::Azure(i) => i.instance_class().await,
        }
    }

    pub async fn instance_size(&self) -> Result<String, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.instance_size().await,
            CloudInstance::Gcp(i) => i.instance_size().await,
            CloudInstance::Azure(i) => i.instance_size().await,
        }
    }

    pub async fn cpu_count(&self) -> usize {
        self.host().await.cpu_count
    }

    pub async fn memory_bytes(&self) -> u64 {
        self.host().await.memory_bytes
    }

    async fn host(&self) -> HostResources {
        match self {
            CloudInstance::Aws(i) => i.host().await,
            CloudInstance::Gcp(i) => i.host().await,
            CloudInstance::Azure(i) => i.host().await,
        }
    }

    pub async fn local_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.local_disks().await,
            CloudInstance::Gcp(i) => i.local_disks().await,
            CloudInstance::Azure(i) => i.local_disks().await,
        }
    }

    pub async fn remote_disks(&self) -> Result<BTreeSet<String>, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.remote_disks().await,
            CloudInstance::Gcp(i) => i.remote_disks().await,
            CloudInstance::Azure(i) => i.remote_disks().await,
        }
    }

    /// Local disks available for the data RAID, reconciled per provider.
    pub async fn disk_count(&self) -> Result<usize, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.disk_count().await,
            CloudInstance::Gcp(i) => Ok(i.disk_count().await),
            CloudInstance::Azure(i) => i.disk_count().await,
        }
    }

    pub async fn is_supported_class(&self) -> Result<bool, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.is_supported_class().await,
            CloudInstance::Gcp(i) => i.is_supported_class().await,
            CloudInstance::Azure(i) => i.is_supported_class().await,
        }
    }

    pub async fn is_unsupported_class(&self) -> Result<bool, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.is_unsupported_class().await,
            CloudInstance::Gcp(i) => i.is_unsupported_class().await,
            CloudInstance::Azure(i) => i.is_unsupported_class().await,
        }
    }

    /// Suitability verdict with its warnings, which are also logged.
    pub async fn recommendation(&self) -> Result<Verdict, CloudError> {
        let verdict = match self {
            CloudInstance::Aws(i) => i.recommendation().await?,
            CloudInstance::Gcp(i) => i.recommendation().await?,
            CloudInstance::Azure(i) => i.recommendation().await?,
        };
        for warning in &verdict.warnings {
            warn!("{warning}");
        }
        Ok(verdict)
    }

    pub async fn is_recommended(&self) -> Result<bool, CloudError> {
        Ok(self.recommendation().await?.recommended)
    }

    pub async fn private_ipv4(&self) -> Result<String, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.private_ipv4().await,
            CloudInstance::Gcp(i) => i.private_ipv4().await,
            CloudInstance::Azure(i) => i.private_ipv4().await,
        }
    }

    /// Only AWS exposes a public address through metadata.
    pub async fn public_ipv4(&self) -> Result<String, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.public_ipv4().await,
            _ => Err(CloudError::NotSupported),
        }
    }

    /// User data. Empty on GCP and Azure when none was set.
    pub async fn user_data(&self) -> Result<String, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.user_data().await,
            CloudInstance::Gcp(i) => i.user_data().await,
            CloudInstance::Azure(i) => i.user_data().await,
        }
    }

    pub async fn profile(&self) -> Result<InstanceProfile, CloudError> {
        match self {
            CloudInstance::Aws(i) => i.profile().await,
            CloudInstance::Gcp(i) => i.profile().await,
            CloudInstance::Azure(i) => i.profile().await,
        }
    }

    /// Run the IO tuning collaborator `S` against this instance.
    ///
    /// "Unsupported class" and "no preset" outcomes are logged only.
    pub async fn perform_io_setup<S: IoSetup>(&self) -> Result<(), CloudError> {
        let profile = self.profile().await?;
        io_setup::run::<S>(&profile)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_provider() {
        let config = Config::default();
        for provider in CloudProvider::DETECTION_ORDER {
            let instance = CloudInstance::for_provider(provider, &config).unwrap();
            assert_eq!(instance.provider(), provider);
        }
    }

    #[tokio::test]
    async fn test_injected_host_resources() {
        let host = HostResources::new(16, 64 * 1024 * 1024 * 1024);
        let instance = CloudInstance::for_provider(CloudProvider::Gcp, &Config::default())
            .unwrap()
            .with_host_resources(host);
        assert_eq!(instance.cpu_count().await, 16);
        assert_eq!(instance.memory_bytes().await, 64 * 1024 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_public_ipv4_not_supported_off_aws() {
        let instance =
            CloudInstance::for_provider(CloudProvider::Azure, &Config::default()).unwrap();
        assert!(matches!(
            instance.public_ipv4().await,
            Err(CloudError::NotSupported)
        ));
    }
}
