//! Discovery container
//!
//! Composes the KV client, the lease keeper, and the watch loop into
//! connect/disconnect/register/unregister operations, and owns the
//! local registry. One container handles one session against one
//! keyspace endpoint.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::key::ServiceKey;
use crate::kv::{KvClient, PutOptions};
use crate::lease::LeaseKeeper;
use crate::listener::DiscoveryListener;
use crate::registry::ServiceRegistry;
use crate::service::{ServiceRecord, ServiceType};
use crate::watch::{self, Watcher};

/// Property carrying a caller-supplied stable instance id.
pub const ENDPOINT_ID_PROP: &str = "endpoint.id";

struct Connection {
    kv: Arc<KvClient>,
    lease: LeaseKeeper,
    watcher: Watcher,
}

/// Client-side service-discovery engine over an etcd v2-style keyspace.
///
/// While connected, two background tasks run: the lease keeper renews
/// the session directory's TTL, and the watcher reconciles the store's
/// event stream into the local registry. `disconnect` stops and joins
/// both before it returns.
pub struct DiscoveryContainer {
    config: DiscoveryConfig,
    listener: Arc<dyn DiscoveryListener>,
    registry: Arc<ServiceRegistry>,
    state: Mutex<Option<Connection>>,
}

impl DiscoveryContainer {
    pub fn new(config: DiscoveryConfig, listener: Arc<dyn DiscoveryListener>) -> Self {
        Self {
            config,
            listener,
            registry: Arc::new(ServiceRegistry::new()),
            state: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Connect to the keyspace: verify (or create) the discovery
    /// directory, seed the registry from its current contents, create
    /// the session directory, and start the lease and watch tasks.
    /// "Connected" is reported only after all of that succeeded.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Err(DiscoveryError::AlreadyConnected);
        }
        if self.config.session_id.trim().is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "session id must not be empty".to_string(),
            ));
        }

        let target = self.config.base_url.clone();
        self.listener.container_connecting(&target);

        let kv = Arc::new(KvClient::new(
            &self.config.base_url,
            self.config.connect_timeout_ms,
            self.config.read_timeout_ms,
        )?);

        let reconciler = watch::bootstrap(
            &kv,
            &self.config,
            self.registry.clone(),
            self.listener.clone(),
        )
        .await?;

        let lease = LeaseKeeper::spawn(
            kv.clone(),
            self.config.session_path(),
            self.config.session_ttl,
        );
        let watcher = Watcher::spawn(kv.clone(), self.config.prefix.clone(), reconciler);

        *guard = Some(Connection { kv, lease, watcher });
        drop(guard);

        debug!(session = %self.config.session_id, %target, "container connected");
        self.listener.container_connected(&target);
        Ok(())
    }

    /// Advertise a service. The record is written to the store under a
    /// session-scoped key and inserted into the local registry right
    /// away, so the caller sees its own registration without waiting
    /// for the watch round-trip.
    pub async fn register_service(&self, record: &ServiceRecord) -> Result<ServiceKey> {
        let guard = self.state.lock().await;
        let conn = guard.as_ref().ok_or(DiscoveryError::NotConnected)?;

        let mut record = record.clone();
        if record.ttl == 0 {
            record.ttl = self.config.default_service_ttl;
        }

        let key = match record.property_string(ENDPOINT_ID_PROP) {
            Some(id) if Uuid::parse_str(id).is_ok() => {
                ServiceKey::with_instance(&self.config.session_id, id)
            }
            Some(id) => {
                warn!(endpoint_id = id, "endpoint id is not a uuid, generating instance id");
                self.key_for_identity(&record)
            }
            None => self.key_for_identity(&record),
        };

        let value = record.encode()?;
        let path = key.full_key(&self.config.prefix);
        conn.kv
            .put(&path, PutOptions::value(value).with_ttl(record.ttl))
            .await?;

        let new_type = !self.registry.has_type(&record.service_type);
        self.registry.insert(key.clone(), record.clone());
        if new_type {
            self.listener.service_type_discovered(&record.service_type);
        }
        self.listener.service_discovered(&key, &record);

        debug!(%key, location = %record.location, "service registered");
        Ok(key)
    }

    /// Withdraw a service previously registered in this session.
    /// Unregistering a record this session does not own is caller
    /// misuse and fails with [`DiscoveryError::NotRegistered`].
    pub async fn unregister_service(&self, record: &ServiceRecord) -> Result<()> {
        let guard = self.state.lock().await;
        let conn = guard.as_ref().ok_or(DiscoveryError::NotConnected)?;

        let key = self
            .registry
            .find_key_for(record, &self.config.session_id)
            .ok_or(DiscoveryError::NotRegistered)?;
        self.unregister_entry(&conn.kv, &key).await
    }

    /// Withdraw every service this session registered.
    pub async fn unregister_all_services(&self) -> Result<()> {
        let guard = self.state.lock().await;
        let conn = guard.as_ref().ok_or(DiscoveryError::NotConnected)?;

        for (key, _) in self.registry.session_entries(&self.config.session_id) {
            if let Err(e) = self.unregister_entry(&conn.kv, &key).await {
                warn!(%key, error = %e, "unregister failed");
            }
        }
        Ok(())
    }

    /// Key for a record's (type, location) identity within this session.
    /// Re-registering the same identity updates the existing entry
    /// instead of creating a duplicate.
    fn key_for_identity(&self, record: &ServiceRecord) -> ServiceKey {
        self.registry
            .find_key_for(record, &self.config.session_id)
            .unwrap_or_else(|| ServiceKey::new(&self.config.session_id))
    }

    async fn unregister_entry(&self, kv: &KvClient, key: &ServiceKey) -> Result<()> {
        kv.delete(&key.full_key(&self.config.prefix), false).await?;
        if let Some(record) = self.registry.remove(key) {
            self.listener.service_undiscovered(key, &record);
            debug!(%key, "service unregistered");
        }
        Ok(())
    }

    /// Tear the session down: withdraw local registrations, stop the
    /// lease keeper, delete the session directory, stop the watcher,
    /// and clear the registry. Both background tasks are joined before
    /// "disconnected" is reported. A no-op when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(conn) = self.state.lock().await.take() else {
            return Ok(());
        };
        let target = self.config.base_url.clone();
        self.listener.container_disconnecting(&target);

        for (key, _) in self.registry.session_entries(&self.config.session_id) {
            if let Err(e) = self.unregister_entry(&conn.kv, &key).await {
                warn!(%key, error = %e, "unregister during disconnect failed");
            }
        }

        conn.lease.stop().await;

        // Best effort; the session TTL reclaims the directory anyway.
        if let Err(e) = conn.kv.delete(&self.config.session_path(), true).await {
            warn!(error = %e, "session directory cleanup failed");
        }

        conn.watcher.stop().await;
        self.registry.clear();

        debug!(session = %self.config.session_id, %target, "container disconnected");
        self.listener.container_disconnected(&target);
        Ok(())
    }

    /// Record advertising the given (type, location) identity, if known.
    pub fn get_service_info(
        &self,
        service_type: &ServiceType,
        location: &str,
    ) -> Option<ServiceRecord> {
        self.registry.find(service_type, location)
    }

    pub fn get_services(&self) -> Vec<ServiceRecord> {
        self.registry.services()
    }

    pub fn get_services_of_type(&self, service_type: &ServiceType) -> Vec<ServiceRecord> {
        self.registry.services_of_type(service_type)
    }

    pub fn get_service_types(&self) -> Vec<ServiceType> {
        self.registry.service_types()
    }
}
