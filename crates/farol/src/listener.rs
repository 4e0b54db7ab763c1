//! Discovery listener trait and event types
//!
//! The seam to the enclosing component framework: the container reports
//! its lifecycle and every registry change through this trait. All
//! methods default to no-ops so implementors pick what they care about.

use std::sync::Arc;

use crate::key::ServiceKey;
use crate::service::{ServiceRecord, ServiceType};

/// Receives container lifecycle and service discovery notifications.
///
/// Called from the connecting task during connect/disconnect and from
/// the background watch task while connected. Implementations must not
/// block for long and must not call back into the container.
pub trait DiscoveryListener: Send + Sync + 'static {
    fn container_connecting(&self, _target: &str) {}
    fn container_connected(&self, _target: &str) {}
    fn container_disconnecting(&self, _target: &str) {}
    fn container_disconnected(&self, _target: &str) {}

    /// A service type is seen for the first time.
    fn service_type_discovered(&self, _service_type: &ServiceType) {}
    fn service_discovered(&self, _key: &ServiceKey, _record: &ServiceRecord) {}
    fn service_undiscovered(&self, _key: &ServiceKey, _record: &ServiceRecord) {}
}

/// A listener that ignores everything.
pub struct NoopListener;

impl DiscoveryListener for NoopListener {}

/// Flattened event, for closure-based listeners.
#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    Connecting(String),
    Connected(String),
    Disconnecting(String),
    Disconnected(String),
    TypeDiscovered(ServiceType),
    Discovered(ServiceKey, ServiceRecord),
    Undiscovered(ServiceKey, ServiceRecord),
}

/// A listener that forwards every event to a closure.
pub struct FnListener<F>
where
    F: Fn(DiscoveryEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(DiscoveryEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F> DiscoveryListener for FnListener<F>
where
    F: Fn(DiscoveryEvent) + Send + Sync + 'static,
{
    fn container_connecting(&self, target: &str) {
        (self.f)(DiscoveryEvent::Connecting(target.to_string()));
    }

    fn container_connected(&self, target: &str) {
        (self.f)(DiscoveryEvent::Connected(target.to_string()));
    }

    fn container_disconnecting(&self, target: &str) {
        (self.f)(DiscoveryEvent::Disconnecting(target.to_string()));
    }

    fn container_disconnected(&self, target: &str) {
        (self.f)(DiscoveryEvent::Disconnected(target.to_string()));
    }

    fn service_type_discovered(&self, service_type: &ServiceType) {
        (self.f)(DiscoveryEvent::TypeDiscovered(service_type.clone()));
    }

    fn service_discovered(&self, key: &ServiceKey, record: &ServiceRecord) {
        (self.f)(DiscoveryEvent::Discovered(key.clone(), record.clone()));
    }

    fn service_undiscovered(&self, key: &ServiceKey, record: &ServiceRecord) {
        (self.f)(DiscoveryEvent::Undiscovered(key.clone(), record.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_fn_listener_forwards_events() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let listener = FnListener::new(move |event| {
            let tag = match event {
                DiscoveryEvent::Connecting(_) => "connecting",
                DiscoveryEvent::Connected(_) => "connected",
                DiscoveryEvent::Disconnecting(_) => "disconnecting",
                DiscoveryEvent::Disconnected(_) => "disconnected",
                DiscoveryEvent::TypeDiscovered(_) => "type",
                DiscoveryEvent::Discovered(..) => "discovered",
                DiscoveryEvent::Undiscovered(..) => "undiscovered",
            };
            seen_clone.lock().push(tag.to_string());
        });

        listener.container_connecting("http://t");
        listener.container_connected("http://t");
        listener.container_disconnecting("http://t");
        listener.container_disconnected("http://t");

        assert_eq!(
            *seen.lock(),
            vec!["connecting", "connected", "disconnecting", "disconnected"]
        );
    }

    #[test]
    fn test_noop_listener_defaults() {
        // just exercises the default bodies
        let listener = NoopListener;
        listener.container_connected("http://t");
        let t = ServiceType::new(&["a"], &["s"], &["p"], "iana");
        listener.service_type_discovered(&t);
    }
}
