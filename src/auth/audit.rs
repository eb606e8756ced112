//! Audit logging for sign-in and session lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with the serialized event in
//! a single `audit` field, queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `signin.granted` | An ID token verified and a session was issued |
//! | `signin.denied` | Verification, upsert, or issuance failed |
//! | `session.accepted` | A session credential validated for a request |
//! | `session.denied` | A session credential was rejected |

use serde::Serialize;
use uuid::Uuid;

/// Structured audit event for every authentication lifecycle transition.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"signin.granted"`).
    pub event: &'static str,
    /// External subject identifier, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Local user id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Failure kind for denial events. Names the tagged error variant, not
    /// anything a client could see.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Construct a `signin.granted` event.
    #[must_use]
    pub fn signin_granted(subject: &str, user_id: Uuid) -> Self {
        Self {
            event: "signin.granted",
            subject: Some(subject.to_string()),
            user_id: Some(user_id),
            reason: None,
        }
    }

    /// Construct a `signin.denied` event.
    #[must_use]
    pub fn signin_denied(reason: impl Into<String>) -> Self {
        Self {
            event: "signin.denied",
            subject: None,
            user_id: None,
            reason: Some(reason.into()),
        }
    }

    /// Construct a `session.accepted` event.
    #[must_use]
    pub fn session_accepted(subject: &str) -> Self {
        Self {
            event: "session.accepted",
            subject: Some(subject.to_string()),
            user_id: None,
            reason: None,
        }
    }

    /// Construct a `session.denied` event.
    #[must_use]
    pub fn session_denied(reason: impl Into<String>) -> Self {
        Self {
            event: "session.denied",
            subject: None,
            user_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_event_carries_identity() {
        // GIVEN/WHEN: a granted event
        let id = Uuid::new_v4();
        let event = AuditEvent::signin_granted("sub-1", id);

        // THEN: type and identity fields are set
        assert_eq!(event.event, "signin.granted");
        assert_eq!(event.subject.as_deref(), Some("sub-1"));
        assert_eq!(event.user_id, Some(id));
        assert!(event.reason.is_none());
    }

    #[test]
    fn denied_event_carries_reason() {
        let event = AuditEvent::signin_denied("NonceMismatch");
        assert_eq!(event.event, "signin.denied");
        assert_eq!(event.reason.as_deref(), Some("NonceMismatch"));
    }

    #[test]
    fn events_serialize_to_json() {
        let events = vec![
            AuditEvent::signin_granted("sub", Uuid::new_v4()),
            AuditEvent::signin_denied("SignatureInvalid"),
            AuditEvent::session_accepted("sub"),
            AuditEvent::session_denied("CredentialExpired"),
        ];
        for event in events {
            assert!(serde_json::to_string(&event).is_ok());
        }
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::session_accepted("sub"));
    }
}
