//! Provider-specific metadata access and disk discovery.

use std::net::IpAddr;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::host::HostResources;

pub mod aws;
pub mod azure;
pub mod gcp;

/// Resolve `host` to its addresses, empty when resolution fails.
pub(crate) async fn resolve(host: &str) -> Vec<IpAddr> {
    match tokio::net::lookup_host((host, 80)).await {
        Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
        Err(err) => {
            debug!(%host, error = %err, "metadata hostname does not resolve");
            Vec::new()
        }
    }
}

/// Token `index` of an instance type split on `delimiter`, empty when absent.
pub(crate) fn type_token(instance_type: &str, delimiter: char, index: usize) -> &str {
    instance_type.split(delimiter).nth(index).unwrap_or("")
}

/// A cell pre-filled when resources were injected, probed lazily otherwise.
pub(crate) fn host_cell(host: Option<HostResources>) -> OnceCell<HostResources> {
    OnceCell::new_with(host)
}

pub(crate) async fn cached_host(cell: &OnceCell<HostResources>) -> HostResources {
    *cell.get_or_init(|| async { HostResources::probe() }).await
}
