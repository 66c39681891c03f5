use std::sync::Mutex;

use log::{debug, info, warn};

use crate::{
    broadcaster::{EventBroadcaster, lock},
    error::LocationError,
    location::{AuthorizationStatus, HeadingFix, PermissionLevel, PositionFix},
    provider::LocationProvider,
};

#[derive(Debug, Clone, PartialEq)]
/// What a reported status change requires us to do
pub enum AuthorizationEffect {
    /// Nothing, keep delivering as before
    Nothing,
    /// Prompt the user via the provider
    RequestPermission(PermissionLevel),
    /// Close the position stream (and the heading stream when configured) with this error
    Terminate(LocationError),
}

/// Tracks the provider's permission state and decides what each reported change means for
/// the streams. Holds handles to both streams, but by default only ever fails the position
/// stream.
pub struct AuthorizationStateMachine {
    status: Mutex<AuthorizationStatus>,
    permission: PermissionLevel,
    fail_heading: bool,
    position: EventBroadcaster<PositionFix, LocationError>,
    heading: EventBroadcaster<HeadingFix, LocationError>,
}

impl AuthorizationStateMachine {
    pub fn new(
        permission: PermissionLevel,
        fail_heading: bool,
        position: EventBroadcaster<PositionFix, LocationError>,
        heading: EventBroadcaster<HeadingFix, LocationError>,
    ) -> Self {
        Self {
            status: Mutex::new(AuthorizationStatus::default()),
            permission,
            fail_heading,
            position,
            heading,
        }
    }

    /// The last status the provider reported
    pub fn status(&self) -> AuthorizationStatus {
        *lock(&self.status)
    }

    /// Record `reported` as the live status and work out what it requires, without
    /// performing it.
    pub fn transition(&self, reported: AuthorizationStatus) -> AuthorizationEffect {
        let mut status = lock(&self.status);
        if reported != *status {
            info!(
                "Authorization changed: {} -> {}",
                status.as_str(),
                reported.as_str()
            );
        }
        *status = reported;
        drop(status);

        match reported {
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => {
                AuthorizationEffect::Terminate(LocationError::NotAuthorized)
            }
            AuthorizationStatus::Undetermined => {
                AuthorizationEffect::RequestPermission(self.permission)
            }
            AuthorizationStatus::GrantedAlways | AuthorizationStatus::GrantedWhileInUse => {
                AuthorizationEffect::Nothing
            }
            AuthorizationStatus::Unknown => AuthorizationEffect::Terminate(LocationError::Unknown),
        }
    }

    /// Handle a status reported by `provider`, carrying out whatever it requires.
    /// The status lock is released before any provider call or stream delivery.
    pub fn handle(
        &self,
        reported: AuthorizationStatus,
        provider: &dyn LocationProvider,
    ) -> AuthorizationEffect {
        let effect = self.transition(reported);

        match &effect {
            AuthorizationEffect::Nothing => {}
            AuthorizationEffect::RequestPermission(level) => {
                debug!("Requesting {level:?} location permission");
                provider.request_permission(*level);
            }
            AuthorizationEffect::Terminate(err) => {
                if self.position.fail(err.clone()) {
                    warn!("{} stream closed: {err}", self.position.name());
                }
                if self.fail_heading && self.heading.fail(err.clone()) {
                    warn!("{} stream closed: {err}", self.heading.name());
                }
            }
        }

        effect
    }
}
