//! # Payload Enrichment
//!
//! Builds the enriched payload a loop dispatch carries: the event's raw
//! metadata plus a derived `db_id`, plus (best effort) a contact address
//! resolved for the event's owning organization.
//!
//! Owner resolution is an external collaborator call behind
//! [`OwnerResolver`]; a lookup failure degrades to "no recipient resolved"
//! and never fails enrichment.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;

use crate::models::Event;

/// Default recipient path when a loop does not name one.
pub const DEFAULT_RECIPIENT_PATH: &str = "email";

/// Resolves a contact address for an owner/organization identifier.
///
/// External collaborator seam. `Ok(None)` means no contact known; `Err` is
/// treated the same way by the enrichment step.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn resolve_contact(&self, org_id: &str) -> anyhow::Result<Option<String>>;
}

/// Resolver that knows nothing. The default when no lookup source is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl OwnerResolver for NoopResolver {
    async fn resolve_contact(&self, _org_id: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Fixed in-memory org → contact table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    contacts: HashMap<String, String>,
}

impl StaticResolver {
    #[must_use]
    pub fn new(contacts: HashMap<String, String>) -> Self {
        Self { contacts }
    }

    #[must_use]
    pub fn with_contact(mut self, org_id: impl Into<String>, contact: impl Into<String>) -> Self {
        self.contacts.insert(org_id.into(), contact.into());
        self
    }
}

#[async_trait]
impl OwnerResolver for StaticResolver {
    async fn resolve_contact(&self, org_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.contacts.get(org_id).cloned())
    }
}

/// Read a dot-path (`"a.b.c"`) out of a JSON value.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Build the enriched payload for one event.
///
/// Starts from the raw metadata (non-object metadata is wrapped under
/// `"value"`) and always injects `db_id`: entity id, else a metadata-provided
/// `id`, else the event id itself, first non-null wins. When the event
/// references an owning organization, a resolved contact is merged under
/// `email` unless the metadata already carries one.
pub async fn enrich(event: &Event, resolver: &dyn OwnerResolver) -> Value {
    let mut payload: Map<String, Value> = match &event.metadata {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    };

    let db_id = event
        .entity_id
        .map(|id| Value::String(id.to_string()))
        .or_else(|| payload.get("id").filter(|v| !v.is_null()).cloned())
        .unwrap_or_else(|| Value::from(event.id));
    payload.insert("db_id".to_string(), db_id);

    if let Some(org_id) = org_reference(event, &payload) {
        let has_email = matches!(payload.get("email"), Some(Value::String(s)) if !s.is_empty());
        if !has_email {
            match resolver.resolve_contact(&org_id).await {
                Ok(Some(contact)) => {
                    payload.insert("email".to_string(), Value::String(contact));
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        event_id = event.id,
                        org_id = %org_id,
                        error = %error,
                        "owner contact lookup failed, continuing without recipient"
                    );
                }
            }
        }
    }

    Value::Object(payload)
}

fn org_reference(event: &Event, payload: &Map<String, Value>) -> Option<String> {
    if let Some(org_id) = &event.org_id {
        return Some(org_id.clone());
    }
    match payload.get("org_id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Resolve the dispatch recipient from the enriched payload. Only non-empty
/// strings count; anything else means "no recipient" and the caller skips
/// the loop silently.
#[must_use]
pub fn resolve_recipient(payload: &Value, recipient_path: Option<&str>) -> Option<String> {
    let path = recipient_path.unwrap_or(DEFAULT_RECIPIENT_PATH);
    match lookup_path(payload, path) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn event_with(metadata: Value) -> Event {
        Event {
            id: 99,
            org_id: None,
            entity_id: None,
            event_type: "users.insert".to_string(),
            metadata,
            occurred_at: chrono::Utc::now().naive_utc(),
            processed_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    #[test]
    fn lookup_path_walks_nested_objects() {
        let value = json!({"a": {"b": {"c": 7}}, "flat": "x"});
        assert_eq!(lookup_path(&value, "a.b.c"), Some(&json!(7)));
        assert_eq!(lookup_path(&value, "flat"), Some(&json!("x")));
        assert_eq!(lookup_path(&value, "a.missing"), None);
        assert_eq!(lookup_path(&value, "flat.deeper"), None);
    }

    #[tokio::test]
    async fn db_id_prefers_entity_id_then_metadata_id_then_event_id() {
        let entity = Uuid::new_v4();

        let mut event = event_with(json!({"id": "meta-id"}));
        event.entity_id = Some(entity);
        let payload = enrich(&event, &NoopResolver).await;
        assert_eq!(payload["db_id"], json!(entity.to_string()));

        let event = event_with(json!({"id": "meta-id"}));
        let payload = enrich(&event, &NoopResolver).await;
        assert_eq!(payload["db_id"], json!("meta-id"));

        let event = event_with(json!({}));
        let payload = enrich(&event, &NoopResolver).await;
        assert_eq!(payload["db_id"], json!(99));
    }

    #[tokio::test]
    async fn non_object_metadata_is_wrapped() {
        let event = event_with(json!("raw-string"));
        let payload = enrich(&event, &NoopResolver).await;
        assert_eq!(payload["value"], json!("raw-string"));
        assert_eq!(payload["db_id"], json!(99));
    }

    #[tokio::test]
    async fn org_contact_is_merged_from_resolver() {
        let resolver = StaticResolver::default().with_contact("A", "a@x.com");
        let event = event_with(json!({"org_id": "A"}));
        let payload = enrich(&event, &resolver).await;
        assert_eq!(payload["email"], json!("a@x.com"));
    }

    #[tokio::test]
    async fn metadata_email_wins_over_resolved_contact() {
        let resolver = StaticResolver::default().with_contact("A", "a@x.com");
        let event = event_with(json!({"org_id": "A", "email": "user@y.com"}));
        let payload = enrich(&event, &resolver).await;
        assert_eq!(payload["email"], json!("user@y.com"));
    }

    #[tokio::test]
    async fn resolver_failure_degrades_to_no_recipient() {
        struct FailingResolver;

        #[async_trait]
        impl OwnerResolver for FailingResolver {
            async fn resolve_contact(&self, _org_id: &str) -> anyhow::Result<Option<String>> {
                anyhow::bail!("lookup service unavailable")
            }
        }

        let event = event_with(json!({"org_id": "A"}));
        let payload = enrich(&event, &FailingResolver).await;
        assert!(payload.get("email").is_none());
        // Enrichment itself still succeeded.
        assert_eq!(payload["db_id"], json!(99));
    }

    #[test]
    fn recipient_resolution_defaults_to_email_and_requires_a_string() {
        let payload = json!({"email": "a@x.com", "contact": {"slack": "@a"}, "count": 3});
        assert_eq!(resolve_recipient(&payload, None), Some("a@x.com".to_string()));
        assert_eq!(
            resolve_recipient(&payload, Some("contact.slack")),
            Some("@a".to_string())
        );
        assert_eq!(resolve_recipient(&payload, Some("count")), None);
        assert_eq!(resolve_recipient(&payload, Some("missing")), None);
        assert_eq!(resolve_recipient(&json!({"email": ""}), None), None);
    }
}
