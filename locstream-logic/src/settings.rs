use serde::{Deserialize, Serialize};

use super::location::PermissionLevel;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
/// Settings for a [crate::LocationService], fixed for the lifetime of the service
pub struct ServiceSettings {
    /// Also start/stop compass updates when the service is enabled/disabled
    pub track_heading: bool,
    /// Permission to ask for when the provider reports the status as undetermined
    pub permission: PermissionLevel,
    /// Close the heading stream as well when authorization is denied. Off by default as
    /// some providers keep delivering compass readings without location permission.
    pub fail_heading_on_denial: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            track_heading: true,
            permission: PermissionLevel::WhileInUse,
            fail_heading_on_denial: false,
        }
    }
}
