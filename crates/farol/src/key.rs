//! Session-scoped service keys

use uuid::Uuid;

/// Identity of one registered service within the keyspace.
///
/// The store key is `<prefix>/<session-id>/<instance-id>`, both ids
/// UUIDs. Keys whose trailing two path segments are not UUIDs are not
/// service entries (they may be the session's liveness directory or
/// unrelated tree structure) and fail to parse.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    session_id: String,
    instance_id: String,
}

impl ServiceKey {
    /// New key under `session_id` with a random instance id.
    pub fn new(session_id: &str) -> Self {
        Self::with_instance(session_id, &Uuid::new_v4().to_string())
    }

    /// New key with an explicit instance id (e.g. a stable endpoint id).
    pub fn with_instance(session_id: &str, instance_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            instance_id: instance_id.to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn matches_session(&self, session_id: &str) -> bool {
        self.session_id == session_id
    }

    /// Full keyspace path under `prefix`.
    pub fn full_key(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}",
            prefix.trim_end_matches('/'),
            self.session_id,
            self.instance_id
        )
    }

    /// Parse a full keyspace path; the trailing two segments must both
    /// be UUIDs.
    pub fn parse(full_key: &str) -> Option<Self> {
        let mut segments = full_key.split('/').filter(|s| !s.is_empty()).rev();
        let instance_id = segments.next()?;
        let session_id = segments.next()?;
        Uuid::parse_str(session_id).ok()?;
        Uuid::parse_str(instance_id).ok()?;
        Some(Self::with_instance(session_id, instance_id))
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.session_id, self.instance_id)
    }
}
