//! Cloud provider enumeration.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Supported cloud providers, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon Web Services
    Aws,
    /// Google Cloud Platform
    Gcp,
    /// Microsoft Azure
    Azure,
}

impl CloudProvider {
    /// Providers in the order they are probed.
    pub const DETECTION_ORDER: [CloudProvider; 3] =
        [CloudProvider::Aws, CloudProvider::Gcp, CloudProvider::Azure];

    /// Human-readable platform name used in log messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "EC2",
            CloudProvider::Gcp => "Google Cloud",
            CloudProvider::Azure => "Azure Cloud",
        }
    }

    /// Separator between the parts of an instance type string.
    pub fn type_delimiter(&self) -> char {
        match self {
            CloudProvider::Aws => '.',
            CloudProvider::Gcp => '-',
            CloudProvider::Azure => '_',
        }
    }

    /// Database snitch matching this provider's topology metadata.
    pub fn endpoint_snitch(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "Ec2Snitch",
            CloudProvider::Gcp => "GoogleCloudSnitch",
            CloudProvider::Azure => "AzureSnitch",
        }
    }

    pub fn getting_started_url(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "http://www.scylladb.com/doc/getting-started-amazon/",
            CloudProvider::Gcp => "http://www.scylladb.com/doc/getting-started-google/",
            CloudProvider::Azure => "http://www.scylladb.com/doc/getting-started-azure/",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudProvider::Aws => write!(f, "AWS"),
            CloudProvider::Gcp => write!(f, "GCP"),
            CloudProvider::Azure => write!(f, "Azure"),
        }
    }
}

impl FromStr for CloudProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "gcp" => Ok(CloudProvider::Gcp),
            "azure" => Ok(CloudProvider::Azure),
            _ => Err(format!(
                "unknown provider: {} (expected aws, gcp, or azure)",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_display() {
        assert_eq!(CloudProvider::Aws.to_string(), "AWS");
        assert_eq!(CloudProvider::Gcp.to_string(), "GCP");
        assert_eq!(CloudProvider::Azure.to_string(), "Azure");
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("AWS".parse::<CloudProvider>(), Ok(CloudProvider::Aws));
        assert_eq!("gcp".parse::<CloudProvider>(), Ok(CloudProvider::Gcp));
        assert_eq!("Azure".parse::<CloudProvider>(), Ok(CloudProvider::Azure));
        assert!("openstack".parse::<CloudProvider>().is_err());
    }

    #[test]
    fn test_detection_order() {
        assert_eq!(
            CloudProvider::DETECTION_ORDER,
            [CloudProvider::Aws, CloudProvider::Gcp, CloudProvider::Azure]
        );
    }

    #[test]
    fn test_type_delimiters() {
        assert_eq!(CloudProvider::Gcp.type_delimiter(), '-');
        assert_eq!(CloudProvider::Aws.type_delimiter(), '.');
        assert_eq!(CloudProvider::Azure.type_delimiter(), '_');
    }

    #[test]
    fn test_snitches() {
        assert_eq!(CloudProvider::Aws.endpoint_snitch(), "Ec2Snitch");
        assert_eq!(CloudProvider::Gcp.endpoint_snitch(), "GoogleCloudSnitch");
        assert_eq!(CloudProvider::Azure.endpoint_snitch(), "AzureSnitch");
    }
}
