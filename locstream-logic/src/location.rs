use serde::{Deserialize, Serialize};

use crate::UtcDT;

/// A "part" of a location
pub type LocationComponent = f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Where on the earth a position fix was taken
pub struct Coordinates {
    /// Latitude in degrees
    pub lat: LocationComponent,
    /// Longitude in degrees
    pub long: LocationComponent,
    /// Altitude in meters, optional as not every provider reports it
    #[serde(default)]
    pub altitude: Option<LocationComponent>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// A single position reading as reported by a [crate::LocationProvider]
pub struct PositionFix {
    pub coords: Coordinates,
    /// Horizontal accuracy radius in meters
    pub accuracy: LocationComponent,
    pub timestamp: UtcDT,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// A single compass reading as reported by a [crate::LocationProvider]
pub struct HeadingFix {
    /// Degrees clockwise from north
    pub direction: LocationComponent,
    /// Maximum deviation in degrees
    pub accuracy: LocationComponent,
    pub timestamp: UtcDT,
}

impl PositionFix {
    pub fn new(lat: LocationComponent, long: LocationComponent, timestamp: UtcDT) -> Self {
        Self {
            coords: Coordinates {
                lat,
                long,
                altitude: None,
            },
            accuracy: 0.0,
            timestamp,
        }
    }
}

/// Pick the newest fix out of a batch, on equal timestamps the later entry wins.
pub fn latest_fix(fixes: &[PositionFix]) -> Option<&PositionFix> {
    // max_by_key returns the last maximum, which is exactly the tie-break we want
    fixes.iter().max_by_key(|fix| fix.timestamp)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
/// Permission state as reported by the provider
pub enum AuthorizationStatus {
    /// The user hasn't been asked yet
    #[default]
    Undetermined,
    Denied,
    /// Access is blocked by something outside the user's control (parental controls, MDM)
    Restricted,
    GrantedAlways,
    GrantedWhileInUse,
    /// A status this crate doesn't know about, treated as a failure
    Unknown,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undetermined => "undetermined",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
            Self::GrantedAlways => "granted_always",
            Self::GrantedWhileInUse => "granted_while_in_use",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::GrantedAlways | Self::GrantedWhileInUse)
    }
}

impl From<&str> for AuthorizationStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "undetermined" | "not_determined" => Self::Undetermined,
            "denied" => Self::Denied,
            "restricted" => Self::Restricted,
            // Older platforms only had a single "authorized" state
            "granted_always" | "authorized" => Self::GrantedAlways,
            "granted_while_in_use" => Self::GrantedWhileInUse,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for AuthorizationStatus {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<AuthorizationStatus> for &'static str {
    fn from(status: AuthorizationStatus) -> Self {
        status.as_str()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Which permission to ask the provider for
pub enum PermissionLevel {
    #[default]
    WhileInUse,
    Always,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn fix_at(secs: i64, lat: f64) -> PositionFix {
        PositionFix::new(lat, 0.0, Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_latest_fix_picks_newest() {
        let fixes = [fix_at(5, 1.0), fix_at(9, 2.0), fix_at(3, 3.0)];
        let latest = latest_fix(&fixes).expect("No fix picked");
        assert_eq!(latest.coords.lat, 2.0);
    }

    #[test]
    fn test_latest_fix_tie_goes_to_last() {
        let fixes = [fix_at(7, 1.0), fix_at(7, 2.0), fix_at(2, 3.0)];
        let latest = latest_fix(&fixes).expect("No fix picked");
        assert_eq!(latest.coords.lat, 2.0);
    }

    #[test]
    fn test_latest_fix_empty() {
        assert!(latest_fix(&[]).is_none());
    }

    #[test]
    fn test_status_names() {
        let parsed: Vec<AuthorizationStatus> =
            serde_json::from_str(r#"["denied", "authorized", "granted_while_in_use", "provisional"]"#)
                .expect("Failed to parse statuses");
        assert_eq!(
            parsed,
            vec![
                AuthorizationStatus::Denied,
                AuthorizationStatus::GrantedAlways,
                AuthorizationStatus::GrantedWhileInUse,
                AuthorizationStatus::Unknown,
            ]
        );
        let raw = serde_json::to_string(&AuthorizationStatus::Restricted).unwrap();
        assert_eq!(raw, r#""restricted""#);
    }

    #[test]
    fn test_only_granted_statuses_are_granted() {
        let granted = [
            AuthorizationStatus::Undetermined,
            AuthorizationStatus::Denied,
            AuthorizationStatus::Restricted,
            AuthorizationStatus::GrantedAlways,
            AuthorizationStatus::GrantedWhileInUse,
            AuthorizationStatus::Unknown,
        ]
        .into_iter()
        .filter(AuthorizationStatus::is_granted)
        .collect::<Vec<_>>();
        assert_eq!(
            granted,
            vec![
                AuthorizationStatus::GrantedAlways,
                AuthorizationStatus::GrantedWhileInUse
            ]
        );
    }
}
