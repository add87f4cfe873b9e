//! Endpoints, timeouts, retry policy and OS paths used by every provider.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::devices::SystemPaths;

/// Per-attempt timeout for metadata requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Link-local address the metadata services listen on.
pub const LINK_LOCAL_ADDR: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

/// Default AWS and Azure metadata service base URL.
pub const DEFAULT_LINK_LOCAL_URL: &str = "http://169.254.169.254";

/// Default GCP metadata service base URL.
pub const DEFAULT_GCP_URL: &str = "http://metadata.google.internal";

/// Hostname GCP reserves for its metadata server.
pub const GCP_DNS_NAME: &str = "metadata.google.internal";

/// Hostname Azure reserves for its metadata server.
pub const AZURE_DNS_NAME: &str = "metadata.azure.internal";

/// Bounded retry policy for transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Policy used for regular metadata reads.
    pub const fn standard() -> Self {
        Self::new(5, Duration::from_secs(5))
    }

    /// Shorter policy used while probing which provider we are on.
    pub const fn detection() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Configuration shared by the detector and every provider instance.
///
/// The defaults target a real cloud host. Tests point the URLs at mock
/// servers and root [`SystemPaths`] in a temporary directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub aws_base_url: String,
    pub gcp_base_url: String,
    pub azure_base_url: String,
    pub gcp_dns_name: String,
    pub azure_dns_name: String,
    /// Address the GCP DNS name must resolve to.
    pub link_local_addr: IpAddr,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub detection_retry: RetryPolicy,
    pub paths: SystemPaths,
    /// Upper bound for user-data bodies, unlimited when `None`.
    pub max_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aws_base_url: DEFAULT_LINK_LOCAL_URL.to_string(),
            gcp_base_url: DEFAULT_GCP_URL.to_string(),
            azure_base_url: DEFAULT_LINK_LOCAL_URL.to_string(),
            gcp_dns_name: GCP_DNS_NAME.to_string(),
            azure_dns_name: AZURE_DNS_NAME.to_string(),
            link_local_addr: IpAddr::V4(LINK_LOCAL_ADDR),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::standard(),
            detection_retry: RetryPolicy::detection(),
            paths: SystemPaths::default(),
            max_size: None,
        }
    }
}

impl Config {
    /// Point all three providers at the same metadata base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.aws_base_url = base_url.to_string();
        self.gcp_base_url = base_url.to_string();
        self.azure_base_url = base_url.to_string();
        self
    }

    pub fn with_aws_base_url(mut self, base_url: &str) -> Self {
        self.aws_base_url = base_url.to_string();
        self
    }

    pub fn with_gcp_base_url(mut self, base_url: &str) -> Self {
        self.gcp_base_url = base_url.to_string();
        self
    }

    pub fn with_azure_base_url(mut self, base_url: &str) -> Self {
        self.azure_base_url = base_url.to_string();
        self
    }

    /// Override the DNS names probed for GCP and Azure.
    pub fn with_dns_names(mut self, gcp: &str, azure: &str) -> Self {
        self.gcp_dns_name = gcp.to_string();
        self.azure_dns_name = azure.to_string();
        self
    }

    pub fn with_link_local_addr(mut self, addr: IpAddr) -> Self {
        self.link_local_addr = addr;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace both the regular and the detection retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.detection_retry = retry;
        self
    }

    pub fn with_paths(mut self, paths: SystemPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Set the maximum size limit for fetched user data.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.aws_base_url, "http://169.254.169.254");
        assert_eq!(config.gcp_base_url, "http://metadata.google.internal");
        assert_eq!(config.link_local_addr, IpAddr::V4(LINK_LOCAL_ADDR));
        assert_eq!(config.detection_retry, RetryPolicy::new(2, Duration::from_secs(1)));
        assert!(config.max_size.is_none());
    }

    #[test]
    fn test_with_base_url_sets_all_providers() {
        let config = Config::default().with_base_url("http://localhost:8080");
        assert_eq!(config.aws_base_url, "http://localhost:8080");
        assert_eq!(config.gcp_base_url, "http://localhost:8080");
        assert_eq!(config.azure_base_url, "http://localhost:8080");
    }

    #[test]
    fn test_with_retry_sets_both_policies() {
        let policy = RetryPolicy::new(1, Duration::ZERO);
        let config = Config::default().with_retry(policy);
        assert_eq!(config.retry, policy);
        assert_eq!(config.detection_retry, policy);
    }
}
