use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, error, info, warn};

use crate::{
    authorization::AuthorizationStateMachine,
    broadcaster::{EventBroadcaster, EventStream},
    error::LocationError,
    location::{AuthorizationStatus, HeadingFix, PositionFix, latest_fix},
    provider::{LocationDelegate, LocationProvider, ProviderCallbacks},
    settings::ServiceSettings,
};

pub type PositionStream = EventStream<PositionFix, LocationError>;
pub type HeadingStream = EventStream<HeadingFix, LocationError>;

struct ServiceCore<P: LocationProvider> {
    provider: P,
    settings: ServiceSettings,
    enabled: AtomicBool,
    position: EventBroadcaster<PositionFix, LocationError>,
    heading: EventBroadcaster<HeadingFix, LocationError>,
    authorization: AuthorizationStateMachine,
}

impl<P: LocationProvider> ProviderCallbacks for ServiceCore<P> {
    fn positions_updated(&self, fixes: &[PositionFix]) {
        if let Some(fix) = latest_fix(fixes) {
            self.position.publish(*fix);
        } else {
            debug!("Provider sent an empty position batch");
        }
    }

    fn heading_updated(&self, fix: HeadingFix) {
        self.heading.publish(fix);
    }

    fn authorization_changed(&self, status: AuthorizationStatus) {
        self.authorization.handle(status, &self.provider);
    }

    fn failed(&self, err: anyhow::Error) {
        error!("Location provider failed: {err:#}");
        if !self.position.fail(LocationError::wrap(err)) {
            warn!("Position stream was already closed, provider error dropped");
        }
    }
}

/// Turns a [LocationProvider]'s callbacks into a position stream and a heading stream.
///
/// Both streams close for good on their first failure, to resume after a failure build a
/// new service.
pub struct LocationService<P: LocationProvider + 'static> {
    core: Arc<ServiceCore<P>>,
}

impl<P: LocationProvider + 'static> Clone for LocationService<P> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<P: LocationProvider + 'static> LocationService<P> {
    /// Create a service, `make_provider` is handed the [LocationDelegate] the provider should
    /// report into. Callbacks made before this returns are ignored.
    pub fn new(settings: ServiceSettings, make_provider: impl FnOnce(LocationDelegate) -> P) -> Self {
        let position = EventBroadcaster::new("position");
        let heading = EventBroadcaster::new("heading");

        let core = Arc::new_cyclic(|weak: &Weak<ServiceCore<P>>| {
            let callbacks: Weak<dyn ProviderCallbacks> = weak.clone();
            let provider = make_provider(LocationDelegate::new(callbacks));
            let authorization = AuthorizationStateMachine::new(
                settings.permission,
                settings.fail_heading_on_denial,
                position.clone(),
                heading.clone(),
            );
            ServiceCore {
                provider,
                settings,
                enabled: AtomicBool::new(false),
                position,
                heading,
                authorization,
            }
        });

        Self { core }
    }

    /// Ask the provider to start producing updates. There's no guarantee any arrive, the
    /// platform may throttle or never deliver them.
    pub fn enable_service(&self) {
        info!("Enabling location service");
        let status = self.core.authorization.status();
        if !status.is_granted() {
            debug!(
                "Starting updates while authorization is {}, expect nothing until it's granted",
                status.as_str()
            );
        }
        self.core.enabled.store(true, Ordering::Release);
        self.core.provider.start_updating_position();
        if self.core.settings.track_heading {
            self.core.provider.start_updating_heading();
        }
    }

    /// Ask the provider to stop producing updates, fine to call repeatedly
    pub fn disable_service(&self) {
        info!("Disabling location service");
        self.core.enabled.store(false, Ordering::Release);
        self.core.provider.stop_updating_position();
        if self.core.settings.track_heading {
            self.core.provider.stop_updating_heading();
        }
    }

    /// Whether [Self::enable_service] was called more recently than [Self::disable_service]
    pub fn is_enabled(&self) -> bool {
        self.core.enabled.load(Ordering::Acquire)
    }

    pub fn position_stream(&self) -> PositionStream {
        self.core.position.stream()
    }

    pub fn heading_stream(&self) -> HeadingStream {
        self.core.heading.stream()
    }

    /// The status the provider last reported
    pub fn authorization_status(&self) -> AuthorizationStatus {
        self.core.authorization.status()
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.core.settings
    }

    pub fn provider(&self) -> &P {
        &self.core.provider
    }

    /// Another delegate reporting into this service, for providers that are wired up after
    /// construction
    pub fn delegate(&self) -> LocationDelegate {
        let weak: Weak<ServiceCore<P>> = Arc::downgrade(&self.core);
        let callbacks: Weak<dyn ProviderCallbacks> = weak;
        LocationDelegate::new(callbacks)
    }
}
