use std::time::{Duration, Instant};

use crate::span::SpanTracker;

/// Logging field names, in the order they are attached to a request.
pub mod fields {
    pub const REQUEST_ID: &str = "requestId";
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const IDENTITY: &str = "identity";
    pub const SCOPE: &str = "scope";

    /// Scope value for every log line emitted on behalf of a client request.
    pub const CLIENT_REQUEST_SCOPE: &str = "client-request";
}

/// Misuse of a [`RequestContext`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("identity already resolved for this request")]
    IdentityAlreadySet,
}

/// Ordered set of structured logging fields. Re-inserting a name replaces
/// its value in place and keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFields(Vec<(&'static str, String)>);

impl LogFields {
    pub fn insert(&mut self, name: &'static str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
            return;
        }
        self.0.push((name, value));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(n, v)| (*n, v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-request state threaded through every pipeline stage.
/// Created when a request enters the pipeline and dropped when it leaves;
/// never shared between requests.
#[derive(Debug)]
pub struct RequestContext {
    /// Generated or propagated request identifier.
    pub request_id: String,
    pub method: String,
    pub path: String,
    /// Key used for identity resolution and admission control (client address).
    pub client_key: String,
    identity: Option<String>,
    pub started_at: Instant,
    pub fields: LogFields,
    pub spans: SpanTracker,
}

impl RequestContext {
    /// Creates a context with `requestId`, `method` and `path` already attached as log fields.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        client_key: impl Into<String>,
    ) -> Self {
        let request_id = request_id.into();
        let method = method.into();
        let path = path.into();

        let mut log_fields = LogFields::default();
        log_fields.insert(fields::REQUEST_ID, request_id.as_str());
        log_fields.insert(fields::METHOD, method.as_str());
        log_fields.insert(fields::PATH, path.as_str());

        Self {
            request_id,
            method,
            path,
            client_key: client_key.into(),
            identity: None,
            started_at: Instant::now(),
            fields: log_fields,
            spans: SpanTracker::new(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Resolved identity, once set.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Records the resolved identity and attaches the `identity` and `scope`
    /// logging fields.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::IdentityAlreadySet`] on a second call; the
    /// first identity is kept.
    pub fn set_identity(&mut self, identity: impl Into<String>) -> Result<(), ContextError> {
        if self.identity.is_some() {
            return Err(ContextError::IdentityAlreadySet);
        }
        let identity = identity.into();
        self.fields.insert(fields::IDENTITY, identity.as_str());
        self.fields.insert(fields::SCOPE, fields::CLIENT_REQUEST_SCOPE);
        self.identity = Some(identity);
        Ok(())
    }
}
