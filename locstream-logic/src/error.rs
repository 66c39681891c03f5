use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure that closes a location stream, once one of these is delivered the stream
/// never emits again.
#[derive(Debug, Clone, Error)]
pub enum LocationError {
    /// The user (or a device policy) denied access to location
    #[error("Not authorized to access location")]
    NotAuthorized,
    /// The provider can't produce fixes at all, reserved for providers that report this
    #[error("Location service is unavailable")]
    ServiceUnavailable,
    /// Reserved for providers that report a failed lookup separately from a hard error
    #[error("Unable to find location")]
    UnableToFindLocation,
    /// Heading counterpart of [LocationError::UnableToFindLocation]
    #[error("Unable to determine heading")]
    UnableToDetermineHeading,
    /// The provider reported an authorization status we don't recognize
    #[error("Unknown location error")]
    Unknown,
    /// Hard error reported by the provider, passed through as-is.
    /// Shared so the same error can be handed to every subscriber.
    #[error("Location provider error: {0:#}")]
    Wrapped(Arc<anyhow::Error>),
}

/// Fieldless mirror of [LocationError], handy for matching and comparing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationErrorKind {
    NotAuthorized,
    ServiceUnavailable,
    UnableToFindLocation,
    UnableToDetermineHeading,
    Unknown,
    Wrapped,
}

impl LocationError {
    pub fn wrap(err: impl Into<anyhow::Error>) -> Self {
        Self::Wrapped(Arc::new(err.into()))
    }

    pub fn kind(&self) -> LocationErrorKind {
        match self {
            Self::NotAuthorized => LocationErrorKind::NotAuthorized,
            Self::ServiceUnavailable => LocationErrorKind::ServiceUnavailable,
            Self::UnableToFindLocation => LocationErrorKind::UnableToFindLocation,
            Self::UnableToDetermineHeading => LocationErrorKind::UnableToDetermineHeading,
            Self::Unknown => LocationErrorKind::Unknown,
            Self::Wrapped(_) => LocationErrorKind::Wrapped,
        }
    }

    /// The provider error behind a [LocationError::Wrapped], if any
    pub fn underlying(&self) -> Option<&anyhow::Error> {
        if let Self::Wrapped(err) = self {
            Some(err.as_ref())
        } else {
            None
        }
    }
}

impl PartialEq for LocationError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Wrapped(a), Self::Wrapped(b)) => Arc::ptr_eq(a, b),
            _ => self.kind() == other.kind(),
        }
    }
}

impl From<anyhow::Error> for LocationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Wrapped(Arc::new(err))
    }
}

impl fmt::Display for LocationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotAuthorized => "not_authorized",
            Self::ServiceUnavailable => "service_unavailable",
            Self::UnableToFindLocation => "unable_to_find_location",
            Self::UnableToDetermineHeading => "unable_to_determine_heading",
            Self::Unknown => "unknown",
            Self::Wrapped => "wrapped",
        };
        f.write_str(name)
    }
}
