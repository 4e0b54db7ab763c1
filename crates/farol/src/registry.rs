//! Local service registry
//!
//! The one shared mutable structure of a connected container. The watch
//! task and any API-calling task both mutate it; every access holds the
//! single mutex, and no network call is ever made under it. Upsert and
//! remove are idempotent, so a re-delivered watch event leaves the map
//! unchanged.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::key::ServiceKey;
use crate::service::{ServiceRecord, ServiceType};

#[derive(Default)]
pub struct ServiceRegistry {
    inner: Mutex<HashMap<ServiceKey, ServiceRecord>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a record; returns the previous record for the key, if any.
    pub fn insert(&self, key: ServiceKey, record: ServiceRecord) -> Option<ServiceRecord> {
        self.inner.lock().insert(key, record)
    }

    pub fn remove(&self, key: &ServiceKey) -> Option<ServiceRecord> {
        self.inner.lock().remove(key)
    }

    /// Remove every entry owned by `session_id`, returning what was
    /// removed.
    pub fn remove_session(&self, session_id: &str) -> Vec<(ServiceKey, ServiceRecord)> {
        let mut map = self.inner.lock();
        let keys: Vec<ServiceKey> = map
            .keys()
            .filter(|k| k.matches_session(session_id))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| map.remove(&k).map(|r| (k, r)))
            .collect()
    }

    pub fn get(&self, key: &ServiceKey) -> Option<ServiceRecord> {
        self.inner.lock().get(key).cloned()
    }

    /// Find the record advertising the given (type, location) identity.
    pub fn find(&self, service_type: &ServiceType, location: &str) -> Option<ServiceRecord> {
        self.inner
            .lock()
            .values()
            .find(|r| r.service_type == *service_type && r.location == location)
            .cloned()
    }

    /// Key of the entry matching `record`'s identity within `session_id`.
    pub fn find_key_for(&self, record: &ServiceRecord, session_id: &str) -> Option<ServiceKey> {
        self.inner
            .lock()
            .iter()
            .find(|(k, r)| k.matches_session(session_id) && r.same_identity(record))
            .map(|(k, _)| k.clone())
    }

    pub fn services(&self) -> Vec<ServiceRecord> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn services_of_type(&self, service_type: &ServiceType) -> Vec<ServiceRecord> {
        self.inner
            .lock()
            .values()
            .filter(|r| r.service_type == *service_type)
            .cloned()
            .collect()
    }

    /// Distinct service types currently known.
    pub fn service_types(&self) -> Vec<ServiceType> {
        let map = self.inner.lock();
        let mut types: Vec<ServiceType> = Vec::new();
        for record in map.values() {
            if !types.contains(&record.service_type) {
                types.push(record.service_type.clone());
            }
        }
        types
    }

    pub fn has_type(&self, service_type: &ServiceType) -> bool {
        self.inner
            .lock()
            .values()
            .any(|r| r.service_type == *service_type)
    }

    /// Entries owned by `session_id` (a consistent snapshot).
    pub fn session_entries(&self, session_id: &str) -> Vec<(ServiceKey, ServiceRecord)> {
        self.inner
            .lock()
            .iter()
            .filter(|(k, _)| k.matches_session(session_id))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceType;

    const S1: &str = "6dbd2c34-0d1b-4864-a80b-5c83f66beeec";
    const S2: &str = "1c0f9b5e-2a70-4f2e-bc4e-3f4b5a6c7d8e";

    fn record(location: &str, type_name: &str) -> ServiceRecord {
        ServiceRecord {
            location: location.to_string(),
            service_name: String::new(),
            service_type: ServiceType::new(&[type_name], &["default"], &["tcp"], "iana"),
            priority: 0,
            weight: 0,
            ttl: 0,
            properties: vec![],
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let registry = ServiceRegistry::new();
        let key = ServiceKey::new(S1);
        let rec = record("http://a", "a");

        assert!(registry.insert(key.clone(), rec.clone()).is_none());
        assert_eq!(registry.len(), 1);
        // applying the same add again yields the same state
        assert_eq!(registry.insert(key.clone(), rec.clone()), Some(rec.clone()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&key), Some(rec));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ServiceRegistry::new();
        let key = ServiceKey::new(S1);
        registry.insert(key.clone(), record("http://a", "a"));

        assert!(registry.remove(&key).is_some());
        assert!(registry.remove(&key).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_session_scoped() {
        let registry = ServiceRegistry::new();
        registry.insert(ServiceKey::new(S1), record("http://a", "a"));
        registry.insert(ServiceKey::new(S1), record("http://b", "b"));
        registry.insert(ServiceKey::new(S2), record("http://c", "c"));

        let removed = registry.remove_session(S1);
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_session(S1).is_empty());
    }

    #[test]
    fn test_type_queries() {
        let registry = ServiceRegistry::new();
        registry.insert(ServiceKey::new(S1), record("http://a", "config"));
        registry.insert(ServiceKey::new(S2), record("http://b", "config"));
        registry.insert(ServiceKey::new(S2), record("http://c", "metrics"));

        let config = ServiceType::new(&["config"], &["default"], &["tcp"], "iana");
        assert_eq!(registry.services_of_type(&config).len(), 2);
        assert_eq!(registry.service_types().len(), 2);
        assert!(registry.has_type(&config));
        assert_eq!(registry.find(&config, "http://b").unwrap().location, "http://b");
        assert!(registry.find(&config, "http://c").is_none());
    }

    #[test]
    fn test_find_key_for_respects_session() {
        let registry = ServiceRegistry::new();
        let rec = record("http://a", "a");
        let key = ServiceKey::new(S1);
        registry.insert(key.clone(), rec.clone());

        assert_eq!(registry.find_key_for(&rec, S1), Some(key));
        assert!(registry.find_key_for(&rec, S2).is_none());
    }
}
