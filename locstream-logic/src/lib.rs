mod authorization;
mod broadcaster;
mod error;
mod location;
mod provider;
mod service;
mod settings;

use chrono::{DateTime, Utc};

pub use authorization::{AuthorizationEffect, AuthorizationStateMachine};
pub use broadcaster::{
    EventBroadcaster, EventStream, StreamEvent, StreamObserver, Subscription, SubscriptionId,
};
pub use error::{LocationError, LocationErrorKind};
pub use location::{
    AuthorizationStatus, Coordinates, HeadingFix, LocationComponent, PermissionLevel,
    PositionFix, latest_fix,
};
pub use provider::{LocationDelegate, LocationProvider, ProviderCallbacks};
pub use service::{HeadingStream, LocationService, PositionStream};
pub use settings::ServiceSettings;

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
