//! Versioned releases
//!
//! The client side ([`manager::ReleaseManager`]) archives a project, uploads
//! it into `<apps-root>/<app>/<version>/` and asks the agent to activate it.
//! The agent side ([`stage::ReleaseStager`]) unpacks, links shared state, cuts
//! `current` over and restarts dependent services.

pub mod archive;
pub mod cleanup;
pub mod ident;
pub mod manager;
pub mod secrets;
pub mod services;
pub mod stage;
pub mod state;

use crate::errors::ShipError;
use crate::release::ident::{AppName, ReleaseVersion, VolumeName};

/// One (app, version) to release, with the named volumes it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub app: AppName,
    pub version: ReleaseVersion,
    pub volumes: Vec<VolumeName>,
}

impl ReleaseRequest {
    /// Validate every identifier before anything touches a machine
    pub fn parse<S: AsRef<str>>(app: &str, version: &str, volumes: &[S]) -> Result<Self, ShipError> {
        let app = AppName::new(app)?;
        let version = ReleaseVersion::new(version)?;
        let mut parsed: Vec<VolumeName> = volumes
            .iter()
            .map(|v| VolumeName::new(v.as_ref()))
            .collect::<Result<_, _>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(Self {
            app,
            version,
            volumes: parsed,
        })
    }
}
