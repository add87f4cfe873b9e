//! Identify the cloud a host runs on and characterize its storage.
//!
//! This crate detects whether the current machine is an AWS, GCP or Azure
//! instance, builds a uniform inventory of local (ephemeral) and remote
//! (network-attached) disks, and decides whether the instance shape is
//! recommended for local-storage-optimized workloads.
//!
//! # Features
//!
//! - Provider detection in a fixed AWS, GCP, Azure order
//! - Root, local and remote disk discovery from `/dev`, the mount table and sysfs
//! - Disk counts reconciled against provider metadata
//! - Suitability verdict from class, CPU:RAM, disk count and disk:RAM ratio
//! - Bounded-retry metadata requests with AWS IMDSv2 support
//!
//! # Example
//!
//! ```ignore
//! use cloud_instance::{CloudInstance, CloudError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CloudError> {
//!     let instance = CloudInstance::detect().await?;
//!
//!     let local = instance.local_disks().await?;
//!     let remote = instance.remote_disks().await?;
//!     println!("{}: local {:?}, remote {:?}", instance.provider(), local, remote);
//!
//!     if instance.is_recommended().await? {
//!         println!("local disks are fit for tuning");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Provider-Specific Behavior
//!
//! | Provider | Type format | Local disk count |
//! |----------|-------------|------------------|
//! | AWS | `i3.16xlarge` | NVMe model scan plus block-device-mapping |
//! | GCP | `n2-standard-2` | min(OS NVMe, metadata NVMe) |
//! | Azure | `Standard_L8s_v2` | min(OS NVMe, Lsv2 table) |

mod client;
mod config;
mod detect;
mod devices;
mod error;
mod host;
mod instance;
mod io_setup;
mod provider;
mod providers;
mod suitability;

pub use client::with_retry;
pub use config::{Config, RetryPolicy};
pub use detect::detect_provider;
pub use devices::{DiskInventory, SystemPaths};
pub use error::CloudError;
pub use host::HostResources;
pub use instance::CloudInstance;
pub use io_setup::{InstanceProfile, IoSetup, IoSetupError};
pub use provider::CloudProvider;
pub use providers::{aws, azure, gcp};
pub use suitability::{evaluate_class, evaluate_shape, ClassCheck, Shape, Verdict};
