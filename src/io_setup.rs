//! Contract with the IO scheduler tuning subsystem.
//!
//! The tuning itself lives outside this crate. An instance builds an
//! [`InstanceProfile`], hands it to an [`IoSetup`] implementation and runs
//! `generate` then `save`.

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::devices::DiskInventory;
use crate::host::HostResources;
use crate::provider::CloudProvider;

/// Errors reported by an IO setup implementation.
#[derive(Debug, Error)]
pub enum IoSetupError {
    /// The instance class has no tuning support.
    #[error("unsupported instance class")]
    UnsupportedInstanceClass,

    /// The class is supported but no preset matches this shape.
    #[error("no IO preset found for this instance")]
    PresetNotFound,

    /// Any other failure, e.g. while writing the configuration.
    #[error("{0}")]
    Failed(String),
}

/// Snapshot of a characterized instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceProfile {
    pub provider: CloudProvider,
    pub instance_type: String,
    pub instance_class: String,
    pub instance_size: String,
    pub host: HostResources,
    pub disks: DiskInventory,
    pub disk_count: usize,
}

/// Provider-specific IO tuning built from an instance profile.
pub trait IoSetup: Sized {
    fn from_profile(profile: &InstanceProfile) -> Self;

    /// Compute tuning parameters.
    fn generate(&mut self) -> Result<(), IoSetupError>;

    /// Persist whatever `generate` produced.
    fn save(&self) -> Result<(), IoSetupError>;
}

/// Build, generate and save. The two "not tunable" outcomes of `generate`
/// are logged and setup continues with `save`.
pub fn run<S: IoSetup>(profile: &InstanceProfile) -> Result<(), IoSetupError> {
    let mut setup = S::from_profile(profile);
    match setup.generate() {
        Ok(()) => {}
        Err(IoSetupError::UnsupportedInstanceClass) => {
            error!(
                "This is not a recommended {} instance setup for auto local disk tuning.",
                profile.provider.display_name()
            );
        }
        Err(IoSetupError::PresetNotFound) => match profile.provider {
            CloudProvider::Aws => error!(
                "This is a supported AWS instance type but there are no preconfigured IO scheduler parameters for it."
            ),
            _ => error!(
                "Did not detect number of disks in {} instance setup for auto local disk tuning.",
                profile.provider.display_name()
            ),
        },
        Err(err) => return Err(err),
    }
    setup.save()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    thread_local! {
        static SAVED: Cell<bool> = const { Cell::new(false) };
    }

    struct Scripted {
        outcome: fn() -> Result<(), IoSetupError>,
    }

    impl IoSetup for Scripted {
        fn from_profile(profile: &InstanceProfile) -> Self {
            let outcome: fn() -> Result<(), IoSetupError> = match profile.instance_class.as_str() {
                "e2" => || Err(IoSetupError::UnsupportedInstanceClass),
                "n2" => || Err(IoSetupError::PresetNotFound),
                "broken" => || Err(IoSetupError::Failed("disk vanished".to_string())),
                _ => || Ok(()),
            };
            Self { outcome }
        }

        fn generate(&mut self) -> Result<(), IoSetupError> {
            (self.outcome)()
        }

        fn save(&self) -> Result<(), IoSetupError> {
            SAVED.with(|saved| saved.set(true));
            Ok(())
        }
    }

    fn profile(class: &str) -> InstanceProfile {
        InstanceProfile {
            provider: CloudProvider::Gcp,
            instance_type: format!("{class}-standard-8"),
            instance_class: class.to_string(),
            instance_size: "8".to_string(),
            host: HostResources::new(8, 32 * 1024 * 1024 * 1024),
            disks: DiskInventory::default(),
            disk_count: 0,
        }
    }

    fn run_and_check_saved(class: &str) -> (Result<(), IoSetupError>, bool) {
        SAVED.with(|saved| saved.set(false));
        let result = run::<Scripted>(&profile(class));
        (result, SAVED.with(|saved| saved.get()))
    }

    #[test]
    fn test_success_saves() {
        let (result, saved) = run_and_check_saved("c2");
        assert!(result.is_ok());
        assert!(saved);
    }

    #[test]
    fn test_named_conditions_are_swallowed() {
        for class in ["e2", "n2"] {
            let (result, saved) = run_and_check_saved(class);
            assert!(result.is_ok());
            assert!(saved);
        }
    }

    #[test]
    fn test_other_failures_propagate() {
        let (result, saved) = run_and_check_saved("broken");
        assert!(matches!(result, Err(IoSetupError::Failed(_))));
        assert!(!saved);
    }
}
