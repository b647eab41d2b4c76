use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Stable identifier of a monitored target, used as the key into persisted state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Decides whether a decoded response body means the booking went through.
///
/// Response schemas differ between booking services (and between versions of
/// the same service), so every target carries its own predicate.
pub trait SuccessPredicate: Send + Sync + fmt::Debug {
    fn is_success(&self, body: &Value) -> bool;

    /// Human-readable reason the server gave for a pending answer, if any
    fn pending_message(&self, _body: &Value) -> Option<String> {
        None
    }
}

/// Predicate reading a boolean field from a JSON object.
///
/// A missing or non-boolean field counts as "not yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolField {
    pub success_field: String,
    pub message_field: Option<String>,
}

impl BoolField {
    pub fn new(success_field: impl Into<String>) -> Self {
        Self { success_field: success_field.into(), message_field: None }
    }

    pub fn with_message_field(mut self, field: impl Into<String>) -> Self {
        self.message_field = Some(field.into());
        self
    }
}

impl Default for BoolField {
    fn default() -> Self {
        Self::new("isSuccess").with_message_field("message")
    }
}

impl SuccessPredicate for BoolField {
    fn is_success(&self, body: &Value) -> bool {
        body.get(&self.success_field).and_then(Value::as_bool).unwrap_or(false)
    }

    fn pending_message(&self, body: &Value) -> Option<String> {
        let field = self.message_field.as_deref()?;
        body.get(field).and_then(Value::as_str).map(str::to_owned)
    }
}

/// What a well-formed probe response told us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Pending { message: Option<String> },
}

/// A monitored booking endpoint. Immutable once built.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub endpoint: String,
    /// Opaque request document POSTed on every probe
    pub body: Value,
    predicate: Arc<dyn SuccessPredicate>,
}

impl Target {
    pub fn new(
        id: impl Into<TargetId>,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            body,
            predicate: Arc::new(BoolField::default()),
        }
    }

    pub fn with_predicate(mut self, predicate: impl SuccessPredicate + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn interpret(&self, body: &Value) -> ProbeOutcome {
        if self.predicate.is_success(body) {
            ProbeOutcome::Success
        } else {
            ProbeOutcome::Pending { message: self.predicate.pending_message(body) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_field_reads_success_flag() {
        let predicate = BoolField::default();

        assert!(predicate.is_success(&json!({ "isSuccess": true })));
        assert!(!predicate.is_success(&json!({ "isSuccess": false })));
        assert!(!predicate.is_success(&json!({ "isSuccess": "true" })));
        assert!(!predicate.is_success(&json!({})));
        assert!(!predicate.is_success(&json!([true])));
    }

    #[test]
    fn interpret_extracts_pending_message() {
        let target = Target::new("43", "Khutorok", "http://localhost/book", json!({}));

        let outcome = target.interpret(&json!({
            "isSuccess": false,
            "message": "Selected dates are already taken",
        }));

        assert_eq!(
            outcome,
            ProbeOutcome::Pending { message: Some("Selected dates are already taken".into()) }
        );
    }

    #[test]
    fn custom_predicate_replaces_default() {
        let target = Target::new("44", "Perevoloka", "http://localhost/book", json!({}))
            .with_predicate(BoolField::new("isSuccessful"));

        assert_eq!(target.interpret(&json!({ "isSuccessful": true })), ProbeOutcome::Success);
        assert_eq!(
            target.interpret(&json!({ "isSuccess": true })),
            ProbeOutcome::Pending { message: None }
        );
    }

    #[test]
    fn target_id_serializes_as_plain_string() {
        let id = TargetId::new("128");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"128\"");
    }
}
