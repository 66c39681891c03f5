use std::sync::Weak;

use crate::location::{AuthorizationStatus, HeadingFix, PermissionLevel, PositionFix};

/// The platform service that actually produces fixes.
///
/// Every method is a fire-and-forget command, results come back later through the
/// [LocationDelegate] the provider was built with.
pub trait LocationProvider: Send + Sync {
    /// Begin producing position fixes
    fn start_updating_position(&self);
    /// Stop producing position fixes, must be fine to call when already stopped
    fn stop_updating_position(&self);
    /// Ask the user for permission, the answer arrives via
    /// [ProviderCallbacks::authorization_changed]
    fn request_permission(&self, level: PermissionLevel);
    /// Begin producing heading fixes, not every provider has a compass
    fn start_updating_heading(&self) {}
    /// Stop producing heading fixes
    fn stop_updating_heading(&self) {}
}

/// Callback slots a provider reports into, provider implementations are expected to call
/// these one at a time.
pub trait ProviderCallbacks: Send + Sync {
    /// A batch of new position fixes, in the order the provider received them
    fn positions_updated(&self, fixes: &[PositionFix]);
    /// A new compass reading
    fn heading_updated(&self, fix: HeadingFix);
    /// The permission state changed (or was re-confirmed)
    fn authorization_changed(&self, status: AuthorizationStatus);
    /// The provider hit an error it can't recover from
    fn failed(&self, error: anyhow::Error);
}

/// Handed to a [LocationProvider] when a [crate::LocationService] is built.
///
/// Only weakly references the service, once the service is dropped every callback is
/// silently ignored.
#[derive(Clone)]
pub struct LocationDelegate(Weak<dyn ProviderCallbacks>);

impl LocationDelegate {
    pub(crate) fn new(target: Weak<dyn ProviderCallbacks>) -> Self {
        Self(target)
    }

    /// Whether the service this delegate reports to is still around
    pub fn is_connected(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl ProviderCallbacks for LocationDelegate {
    fn positions_updated(&self, fixes: &[PositionFix]) {
        if let Some(target) = self.0.upgrade() {
            target.positions_updated(fixes);
        }
    }

    fn heading_updated(&self, fix: HeadingFix) {
        if let Some(target) = self.0.upgrade() {
            target.heading_updated(fix);
        }
    }

    fn authorization_changed(&self, status: AuthorizationStatus) {
        if let Some(target) = self.0.upgrade() {
            target.authorization_changed(status);
        }
    }

    fn failed(&self, error: anyhow::Error) {
        if let Some(target) = self.0.upgrade() {
            target.failed(error);
        }
    }
}
