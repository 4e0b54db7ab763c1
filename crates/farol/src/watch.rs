//! Watch loop and event reconciliation
//!
//! Turns the store's long-poll event stream into add/remove transitions
//! on the local registry. The [`Reconciler`] is the pure part: it
//! classifies one `(action, node)` event, mutates the registry, fires
//! listener notifications, and advances the watch cursor. The
//! [`Watcher`] drives it from a background task, retrying failed watch
//! calls at the unchanged cursor until stopped or until the session's
//! own delete arrives.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::key::ServiceKey;
use crate::kv::{KvClient, KvSuccess, Node, PutOptions};
use crate::listener::DiscoveryListener;
use crate::registry::ServiceRegistry;
use crate::service::ServiceRecord;

/// Store error code for a missing key.
const KEY_NOT_FOUND: i64 = 100;

/// What the watch loop should do after applying an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchStep {
    Continue,
    /// The session's own directory was deleted; stop watching.
    Close,
}

/// Applies watch events to the registry and tracks the watch cursor.
pub struct Reconciler {
    registry: Arc<ServiceRegistry>,
    listener: Arc<dyn DiscoveryListener>,
    prefix: String,
    session_id: String,
    /// `waitIndex` of the next watch call; only ever moves forward, and
    /// only after an event has been fully applied.
    cursor: u64,
}

impl Reconciler {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        listener: Arc<dyn DiscoveryListener>,
        prefix: &str,
        session_id: &str,
    ) -> Self {
        Self {
            registry,
            listener,
            prefix: prefix.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: u64) {
        self.cursor = cursor;
    }

    fn advance(&mut self, node: &Node) {
        self.cursor = node.modified_index + 1;
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str())
            .map(|s| s.trim_start_matches('/'))
            .unwrap_or(key)
    }

    /// Apply one watch event.
    pub fn apply(&mut self, event: &KvSuccess) -> WatchStep {
        let node = &event.node;

        // Explicit deletion of our own session directory is the
        // disconnect signal. An expire is not: the lease keeper will
        // recreate the directory on its next renewal.
        if event.action == crate::kv::Action::Delete && node.last_segment() == self.session_id {
            debug!(key = %node.key, "session directory removed, closing watch");
            return WatchStep::Close;
        }

        // Other writes under our own session are our own doing; just
        // move the cursor past them.
        if self.strip_prefix(&node.key).starts_with(&self.session_id) {
            self.advance(node);
            return WatchStep::Continue;
        }

        if event.action.is_add() {
            self.apply_add(node);
        } else if event.action.is_remove() {
            self.apply_remove(node);
        } else {
            debug!(action = event.action.as_str(), key = %node.key, "ignoring unknown action");
        }
        self.advance(node);
        WatchStep::Continue
    }

    /// Add every leaf of a subtree; used for bootstrap and directory
    /// add events.
    pub fn add_tree(&self, node: &Node) {
        if node.dir {
            if let Some(children) = &node.nodes {
                for child in children {
                    self.add_tree(child);
                }
            }
        } else {
            self.add_leaf(node);
        }
    }

    fn apply_add(&self, node: &Node) {
        if node.dir {
            self.add_tree(node);
        } else {
            self.add_leaf(node);
        }
    }

    fn add_leaf(&self, node: &Node) {
        let Some(key) = ServiceKey::parse(&node.key) else {
            debug!(key = %node.key, "ignoring non-service key");
            return;
        };
        let Some(value) = &node.value else {
            warn!(key = %node.key, "service node has no value");
            return;
        };
        match ServiceRecord::decode(value) {
            Ok(record) => self.insert_and_notify(key, record),
            Err(e) => warn!(key = %node.key, error = %e, "could not decode service record"),
        }
    }

    /// Upsert plus notifications; a type is announced only the first
    /// time it appears in the registry.
    fn insert_and_notify(&self, key: ServiceKey, record: ServiceRecord) {
        let new_type = !self.registry.has_type(&record.service_type);
        self.registry.insert(key.clone(), record.clone());
        if new_type {
            self.listener.service_type_discovered(&record.service_type);
        }
        self.listener.service_discovered(&key, &record);
    }

    fn apply_remove(&self, node: &Node) {
        if !node.dir {
            if let Some(key) = ServiceKey::parse(&node.key) {
                if let Some(record) = self.registry.remove(&key) {
                    self.listener.service_undiscovered(&key, &record);
                }
                return;
            }
        }
        // A directory (or unparsable key) going away takes a whole
        // session with it.
        let session_id = node.last_segment();
        for (key, record) in self.registry.remove_session(session_id) {
            self.listener.service_undiscovered(&key, &record);
        }
    }
}

/// Read the discovery directory, seed the registry from it, create the
/// session's own directory, and return a cursor-initialized
/// [`Reconciler`]. Fails loudly; a failure here aborts the connect.
pub(crate) async fn bootstrap(
    kv: &KvClient,
    config: &DiscoveryConfig,
    registry: Arc<ServiceRegistry>,
    listener: Arc<dyn DiscoveryListener>,
) -> Result<Reconciler> {
    let top = match kv.get(&config.prefix, true).await {
        Ok(response) => response,
        Err(e) if e.protocol_code() == Some(KEY_NOT_FOUND) => {
            debug!(prefix = %config.prefix, "discovery directory missing, creating");
            kv.put(&config.prefix, PutOptions::directory()).await?
        }
        Err(e) => return Err(e),
    };
    if !top.node.dir {
        return Err(DiscoveryError::Other(anyhow::anyhow!(
            "keyspace entry {} exists but is not a directory",
            config.prefix
        )));
    }

    let mut reconciler = Reconciler::new(
        registry,
        listener,
        &config.prefix,
        &config.session_id,
    );
    reconciler.set_cursor(top.node.created_index);
    reconciler.add_tree(&top.node);

    let session = kv
        .put(
            &config.session_path(),
            PutOptions::directory().with_ttl(config.session_ttl),
        )
        .await?;
    reconciler.set_cursor(session.node.modified_index + 1);

    Ok(reconciler)
}

/// Handle to the running watch task.
pub struct Watcher {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Watcher {
    /// Spawn the watch loop over `dir_path` with a bootstrapped
    /// reconciler.
    pub fn spawn(kv: Arc<KvClient>, dir_path: String, mut reconciler: Reconciler) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            debug!(%dir_path, cursor = reconciler.cursor(), "watch loop starting");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(%dir_path, "watch loop stopping");
                        break;
                    }
                    result = kv.watch(&dir_path, Some(reconciler.cursor())) => match result {
                        Ok(event) => {
                            if reconciler.apply(&event) == WatchStep::Close {
                                debug!(%dir_path, "watch loop closed by session removal");
                                break;
                            }
                        }
                        // Errors never stop the loop; retry at the same cursor.
                        Err(e) => {
                            warn!(%dir_path, cursor = reconciler.cursor(), error = %e, "watch failed, retrying");
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the loop and wait for it to finish; after this no registry
    /// mutation or notification originates from the watch task.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Action;
    use crate::listener::{DiscoveryEvent, FnListener};
    use crate::service::ServiceType;
    use parking_lot::Mutex;

    const SESSION: &str = "6dbd2c34-0d1b-4864-a80b-5c83f66beeec";
    const OTHER_SESSION: &str = "1c0f9b5e-2a70-4f2e-bc4e-3f4b5a6c7d8e";
    const INSTANCE_A: &str = "9f7d0f4e-7a3e-4c53-9c1b-5bd2a1a4f9aa";
    const INSTANCE_B: &str = "b3a4c0de-0011-4a5f-8d9e-aabbccddeeff";

    fn record(location: &str) -> ServiceRecord {
        ServiceRecord {
            location: location.to_string(),
            service_name: "svc".to_string(),
            service_type: ServiceType::new(&["config"], &["default"], &["tcp"], "iana"),
            priority: 0,
            weight: 0,
            ttl: 0,
            properties: vec![],
        }
    }

    fn leaf(key: &str, value: &str, index: u64) -> Node {
        Node {
            key: key.to_string(),
            dir: false,
            value: Some(value.to_string()),
            created_index: index,
            modified_index: index,
            ttl: None,
            expiration: None,
            nodes: None,
        }
    }

    fn dir(key: &str, index: u64, children: Vec<Node>) -> Node {
        Node {
            key: key.to_string(),
            dir: true,
            value: None,
            created_index: index,
            modified_index: index,
            ttl: None,
            expiration: None,
            nodes: Some(children),
        }
    }

    fn event(action: Action, node: Node) -> KvSuccess {
        KvSuccess {
            action,
            node,
            prev_node: None,
        }
    }

    struct Fixture {
        registry: Arc<ServiceRegistry>,
        events: Arc<Mutex<Vec<String>>>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ServiceRegistry::new());
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let listener = FnListener::arc(move |event| {
            let tag = match event {
                DiscoveryEvent::TypeDiscovered(_) => "type".to_string(),
                DiscoveryEvent::Discovered(key, _) => format!("add:{}", key.instance_id()),
                DiscoveryEvent::Undiscovered(key, _) => format!("del:{}", key.instance_id()),
                other => format!("{:?}", other),
            };
            sink.lock().push(tag);
        });
        let reconciler = Reconciler::new(registry.clone(), listener, "/farol", SESSION);
        Fixture {
            registry,
            events,
            reconciler,
        }
    }

    #[test]
    fn test_add_event_upserts_and_notifies() {
        let mut fx = fixture();
        let value = record("http://a").encode().unwrap();
        let key = format!("/farol/{}/{}", OTHER_SESSION, INSTANCE_A);

        let step = fx.reconciler.apply(&event(Action::Set, leaf(&key, &value, 10)));
        assert_eq!(step, WatchStep::Continue);
        assert_eq!(fx.reconciler.cursor(), 11);
        assert_eq!(fx.registry.len(), 1);
        assert_eq!(
            *fx.events.lock(),
            vec!["type".to_string(), format!("add:{}", INSTANCE_A)]
        );
    }

    #[test]
    fn test_duplicate_add_is_idempotent_and_type_fires_once() {
        let mut fx = fixture();
        let value = record("http://a").encode().unwrap();
        let key = format!("/farol/{}/{}", OTHER_SESSION, INSTANCE_A);

        fx.reconciler.apply(&event(Action::Set, leaf(&key, &value, 10)));
        fx.reconciler.apply(&event(Action::Set, leaf(&key, &value, 12)));

        assert_eq!(fx.registry.len(), 1);
        assert_eq!(fx.reconciler.cursor(), 13);
        // one type notification, two discovered notifications
        let events = fx.events.lock();
        assert_eq!(events.iter().filter(|e| *e == "type").count(), 1);
        assert_eq!(
            events.iter().filter(|e| e.starts_with("add:")).count(),
            2
        );
    }

    #[test]
    fn test_remove_event_and_second_remove_is_noop() {
        let mut fx = fixture();
        let value = record("http://a").encode().unwrap();
        let key = format!("/farol/{}/{}", OTHER_SESSION, INSTANCE_A);
        fx.reconciler.apply(&event(Action::Set, leaf(&key, &value, 10)));

        fx.reconciler.apply(&event(Action::Delete, leaf(&key, "", 15)));
        assert!(fx.registry.is_empty());
        fx.reconciler.apply(&event(Action::Delete, leaf(&key, "", 16)));
        assert_eq!(fx.reconciler.cursor(), 17);
        let events = fx.events.lock();
        // only one undiscovered despite two delete events
        assert_eq!(
            events.iter().filter(|e| e.starts_with("del:")).count(),
            1
        );
    }

    #[test]
    fn test_expired_session_directory_removes_all_entries() {
        let mut fx = fixture();
        let value = record("http://a").encode().unwrap();
        for (instance, idx) in [(INSTANCE_A, 10), (INSTANCE_B, 11)] {
            let key = format!("/farol/{}/{}", OTHER_SESSION, instance);
            fx.reconciler.apply(&event(Action::Set, leaf(&key, &value, idx)));
        }
        assert_eq!(fx.registry.len(), 2);

        let dir_key = format!("/farol/{}", OTHER_SESSION);
        fx.reconciler
            .apply(&event(Action::Expire, dir(&dir_key, 20, vec![])));
        assert!(fx.registry.is_empty());
        let events = fx.events.lock();
        assert_eq!(
            events.iter().filter(|e| e.starts_with("del:")).count(),
            2
        );
    }

    #[test]
    fn test_own_session_delete_closes_watch() {
        let mut fx = fixture();
        let dir_key = format!("/farol/{}", SESSION);
        let step = fx
            .reconciler
            .apply(&event(Action::Delete, dir(&dir_key, 30, vec![])));
        assert_eq!(step, WatchStep::Close);
    }

    #[test]
    fn test_own_session_writes_are_skipped() {
        let mut fx = fixture();
        let value = record("http://mine").encode().unwrap();
        let key = format!("/farol/{}/{}", SESSION, INSTANCE_A);

        let step = fx.reconciler.apply(&event(Action::Set, leaf(&key, &value, 40)));
        assert_eq!(step, WatchStep::Continue);
        // cursor advanced, nothing applied, nothing fired
        assert_eq!(fx.reconciler.cursor(), 41);
        assert!(fx.registry.is_empty());
        assert!(fx.events.lock().is_empty());
    }

    #[test]
    fn test_unknown_action_is_ignored_but_cursor_advances() {
        let mut fx = fixture();
        let key = format!("/farol/{}/{}", OTHER_SESSION, INSTANCE_A);
        let step = fx.reconciler.apply(&event(
            Action::Unknown("rollback".to_string()),
            leaf(&key, "whatever", 50),
        ));
        assert_eq!(step, WatchStep::Continue);
        assert_eq!(fx.reconciler.cursor(), 51);
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_non_service_keys_are_ignored() {
        let mut fx = fixture();
        let step = fx.reconciler.apply(&event(
            Action::Set,
            leaf("/farol/some-marker", "x", 60),
        ));
        assert_eq!(step, WatchStep::Continue);
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_undecodable_value_skips_node_but_advances() {
        let mut fx = fixture();
        let key = format!("/farol/{}/{}", OTHER_SESSION, INSTANCE_A);
        fx.reconciler
            .apply(&event(Action::Set, leaf(&key, "not json", 70)));
        assert!(fx.registry.is_empty());
        assert_eq!(fx.reconciler.cursor(), 71);
    }

    #[test]
    fn test_cursor_is_monotonic_over_a_sequence() {
        let mut fx = fixture();
        let value = record("http://a").encode().unwrap();
        let mut last = 0;
        for idx in [5u64, 9, 9, 14, 21] {
            let key = format!(
                "/farol/{}/{}",
                OTHER_SESSION, INSTANCE_A
            );
            fx.reconciler.apply(&event(Action::Set, leaf(&key, &value, idx)));
            assert!(fx.reconciler.cursor() >= last);
            assert_eq!(fx.reconciler.cursor(), idx + 1);
            last = fx.reconciler.cursor();
        }
    }

    #[test]
    fn test_bootstrap_tree_adds_every_leaf() {
        let fx = fixture();
        let value_a = record("http://a").encode().unwrap();
        let value_b = record("http://b").encode().unwrap();
        let session_dir = dir(
            &format!("/farol/{}", OTHER_SESSION),
            3,
            vec![
                leaf(
                    &format!("/farol/{}/{}", OTHER_SESSION, INSTANCE_A),
                    &value_a,
                    4,
                ),
                leaf(
                    &format!("/farol/{}/{}", OTHER_SESSION, INSTANCE_B),
                    &value_b,
                    5,
                ),
            ],
        );
        let top = dir("/farol", 2, vec![session_dir]);

        fx.reconciler.add_tree(&top);

        assert_eq!(fx.registry.len(), 2);
        let events = fx.events.lock();
        // same type for both leaves: one type event, two discovered
        assert_eq!(events.iter().filter(|e| *e == "type").count(), 1);
        assert_eq!(
            events.iter().filter(|e| e.starts_with("add:")).count(),
            2
        );
        assert_eq!(
            events.iter().filter(|e| e.starts_with("del:")).count(),
            0
        );
    }
}
