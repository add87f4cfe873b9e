//! Provider detection.

use tracing::debug;

use crate::config::Config;
use crate::error::CloudError;
use crate::provider::CloudProvider;
use crate::providers::{aws, azure, gcp};

/// Probe providers one after another in [`CloudProvider::DETECTION_ORDER`]
/// and return the first that answers.
///
/// # Errors
///
/// Returns `CloudError::UnknownProvider` if no probe succeeds.
pub async fn detect_provider(config: &Config) -> Result<CloudProvider, CloudError> {
    for provider in CloudProvider::DETECTION_ORDER {
        let found = match provider {
            CloudProvider::Aws => aws::probe(config).await,
            CloudProvider::Gcp => gcp::probe(config).await,
            CloudProvider::Azure => azure::probe(config).await,
        };
        if found {
            debug!(%provider, "cloud provider detected");
            return Ok(provider);
        }
        debug!(%provider, "cloud provider probe negative");
    }
    Err(CloudError::UnknownProvider)
}
