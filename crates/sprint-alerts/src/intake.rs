//! Webhook signature verification and canonical event extraction.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::IntakeError;
use crate::models::{ChangeType, Changelog, Issue, Sprint};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the body.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Header carrying the provider event type.
pub const EVENT_HEADER: &str = "x-webhook-event";

/// Header carrying the provider delivery ID.
pub const DELIVERY_HEADER: &str = "x-webhook-delivery";

/// Check the [`SIGNATURE_HEADER`] value against the raw request body.
///
/// The provider sends the lowercase hex HMAC-SHA256 of the body keyed by the
/// organization's secret, as `sha256=<hex>`. The bare hex form and
/// surrounding whitespace are also accepted. Anything that is not valid hex
/// fails, and digests are compared in constant time.
#[must_use]
pub fn verify_signature(body: &[u8], header_value: &str, secret: &str) -> bool {
    let header_value = header_value.trim();
    let digest_hex = header_value
        .strip_prefix("sha256=")
        .unwrap_or(header_value);
    let (Ok(expected), Ok(mut mac)) = (
        hex::decode(digest_hex),
        HmacSha256::new_from_slice(secret.as_bytes()),
    ) else {
        return false;
    };
    mac.update(body);
    mac.finalize().into_bytes().as_slice().ct_eq(&expected).into()
}

/// Hex HMAC-SHA256 of `body`, as a sender would put in [`SIGNATURE_HEADER`].
#[must_use]
pub fn sign(body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Parsed webhook headers.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    /// Unique delivery ID
    pub delivery_id: Option<String>,
    /// Event type
    pub event_type: Option<String>,
    /// HMAC signature
    pub signature: Option<String>,
}

impl WebhookHeaders {
    /// Parse headers from a request.
    #[must_use]
    pub fn from_header_map(get_header: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            delivery_id: get_header(DELIVERY_HEADER).filter(|v| !v.is_empty()),
            event_type: get_header(EVENT_HEADER).filter(|v| !v.is_empty()),
            signature: get_header(SIGNATURE_HEADER).filter(|v| !v.is_empty()),
        }
    }
}

/// Provider event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Issue created
    IssueCreated,
    /// Issue fields changed
    IssueUpdated,
    /// Issue removed
    IssueDeleted,
    /// Comment added
    CommentCreated,
    /// Comment edited
    CommentUpdated,
    /// Time logged
    WorklogUpdated,
    /// Sprint started
    SprintStarted,
    /// Sprint closed
    SprintClosed,
    /// Anything else; acknowledged but not processed
    Unrecognized(String),
}

impl EventKind {
    /// Map the event-type header value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let name = value.trim().to_ascii_lowercase();
        // Providers may namespace the type, e.g. "jira:issue_updated".
        match name.rsplit(':').next().unwrap_or_default() {
            "issue_created" => Self::IssueCreated,
            "issue_updated" => Self::IssueUpdated,
            "issue_deleted" => Self::IssueDeleted,
            "comment_created" => Self::CommentCreated,
            "comment_updated" => Self::CommentUpdated,
            "worklog_updated" => Self::WorklogUpdated,
            "sprint_started" => Self::SprintStarted,
            "sprint_closed" => Self::SprintClosed,
            _ => Self::Unrecognized(value.to_string()),
        }
    }

    /// Change type carried to the engine.
    #[must_use]
    pub const fn change_type(&self) -> ChangeType {
        match self {
            Self::IssueCreated => ChangeType::Created,
            Self::IssueDeleted => ChangeType::Deleted,
            _ => ChangeType::Updated,
        }
    }

    /// Whether the event is a sprint transition.
    #[must_use]
    pub const fn is_sprint(&self) -> bool {
        matches!(self, Self::SprintStarted | Self::SprintClosed)
    }

    /// Whether the event is processed at all.
    #[must_use]
    pub const fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

/// Canonical event handed to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Idempotency key
    pub event_id: String,
    /// Organization
    pub organization_id: String,
    /// Provider event type
    pub kind: EventKind,
    /// Normalized change type
    pub change_type: ChangeType,
    /// Issue state after the change
    #[serde(default)]
    pub issue: Option<Issue>,
    /// Affected issue ID, also set for deletions that only carry a reference
    #[serde(default)]
    pub issue_id: Option<String>,
    /// Field changes delivered with the event
    #[serde(default)]
    pub changelog: Option<Changelog>,
    /// Sprint, for sprint transitions
    #[serde(default)]
    pub sprint: Option<Sprint>,
    /// Sprint contents, for sprint transitions
    #[serde(default)]
    pub sprint_issues: Vec<Issue>,
    /// Raw payload
    pub payload: Value,
    /// When intake accepted the event
    pub received_at: DateTime<Utc>,
    /// Deliveries so far
    #[serde(default)]
    pub attempt: u32,
}

/// Body shape accepted on the webhook endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody {
    #[serde(default)]
    webhook_event_id: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    issue: Option<Value>,
    #[serde(default)]
    changelog: Option<Changelog>,
    #[serde(default)]
    sprint: Option<Sprint>,
    #[serde(default)]
    issues: Vec<Issue>,
}

/// Build the canonical event from a verified request.
pub fn parse_event(
    organization_id: &str,
    headers: &WebhookHeaders,
    raw: &[u8],
    received_at: DateTime<Utc>,
) -> Result<WebhookEvent, IntakeError> {
    let event_type = headers
        .event_type
        .as_deref()
        .ok_or_else(|| IntakeError::MalformedPayload(format!("missing {EVENT_HEADER} header")))?;
    let kind = EventKind::parse(event_type);

    let payload: Value = serde_json::from_slice(raw)
        .map_err(|e| IntakeError::MalformedPayload(format!("invalid JSON: {e}")))?;
    if !payload.is_object() {
        return Err(IntakeError::MalformedPayload(
            "payload must be a JSON object".to_string(),
        ));
    }
    let body: WebhookBody = if kind.is_recognized() {
        serde_json::from_value(payload.clone())
            .map_err(|e| IntakeError::MalformedPayload(e.to_string()))?
    } else {
        WebhookBody::default()
    };

    let mut event = WebhookEvent {
        event_id: String::new(),
        organization_id: organization_id.to_string(),
        change_type: kind.change_type(),
        kind,
        issue: None,
        issue_id: None,
        changelog: body.changelog,
        sprint: None,
        sprint_issues: Vec::new(),
        payload,
        received_at,
        attempt: 0,
    };

    if event.kind.is_sprint() {
        let sprint = body
            .sprint
            .ok_or_else(|| IntakeError::MalformedPayload("sprint event without sprint".to_string()))?;
        event.sprint = Some(sprint);
        event.sprint_issues = body.issues;
    } else if event.kind.is_recognized() {
        let issue = body
            .issue
            .ok_or_else(|| IntakeError::MalformedPayload("issue event without issue".to_string()))?;
        let issue_id = issue
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| IntakeError::MalformedPayload("issue without id".to_string()))?
            .to_string();
        event.issue = match serde_json::from_value::<Issue>(issue) {
            Ok(issue) => Some(issue),
            Err(_) if event.change_type == ChangeType::Deleted => None,
            Err(e) => return Err(IntakeError::MalformedPayload(format!("invalid issue: {e}"))),
        };
        event.issue_id = Some(issue_id);
    }

    let provider_id = headers
        .delivery_id
        .clone()
        .or(body.webhook_event_id)
        .or(body.event_id)
        .filter(|id| !id.is_empty());
    event.event_id = provider_id.unwrap_or_else(|| idempotency_key(&event, raw));
    Ok(event)
}

/// Content-derived idempotency key for events without a provider ID.
///
/// SHA-256 hex of `organization | subject | change type | sha256(payload)`, where
/// the subject is the issue ID, or `sprint:{id}` for sprint transitions.
#[must_use]
pub fn idempotency_key(event: &WebhookEvent, raw: &[u8]) -> String {
    let subject = match (&event.issue_id, &event.sprint) {
        (Some(issue_id), _) => issue_id.clone(),
        (None, Some(sprint)) => format!("sprint:{}", sprint.id),
        (None, None) => String::new(),
    };
    let digest = hex::encode(Sha256::digest(raw));
    let material = format!(
        "{}|{}|{}|{}",
        event.organization_id,
        subject,
        event.change_type.as_str(),
        digest
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}
