//! Atomic record model.
//!
//! An atomic is a mapping from field names to JSON values. Known fields get
//! typed accessors; unknown fields are preserved verbatim and participate in
//! hashing. The on-disk form is one JSON object per ledger line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{AtomicError, Result};
use crate::ids::{ContentHash, TraceId};

/// Schema version written by this implementation.
pub const SCHEMA_VERSION: &str = "1.1.0";

/// The only signature algorithm this ledger writes.
pub const SIGNATURE_ALG: &str = "Ed25519";

/// What kind of entity an atomic describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    File,
    Function,
    Law,
    Decision,
    Agent,
    Contract,
    Test,
}

impl EntityType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "function",
            Self::Law => "law",
            Self::Decision => "decision",
            Self::Agent => "agent",
            Self::Contract => "contract",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = AtomicError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "function" => Ok(Self::Function),
            "law" => Ok(Self::Law),
            "decision" => Ok(Self::Decision),
            "agent" => Ok(Self::Agent),
            "contract" => Ok(Self::Contract),
            "test" => Ok(Self::Test),
            other => Err(AtomicError::invalid_atomic(format!(
                "unknown entity_type {other:?}"
            ))),
        }
    }
}

/// Structured detached-signature envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub alg: String,
    /// Ed25519 public key, 64 hex chars.
    pub public_key: String,
    /// Detached signature, 128 hex chars.
    pub sig: String,
    pub signed_at: DateTime<Utc>,
}

impl SignatureEnvelope {
    /// Decode an envelope from the raw `signature` field value.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| AtomicError::InvalidSignatureFormat {
            reason: e.to_string(),
        })
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One ledger record.
///
/// Wraps the raw field map so decode → encode round-trips preserve unknown
/// fields. Once appended to a ledger file an atomic is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Atomic {
    fields: Map<String, Value>,
}

impl Atomic {
    /// Wrap a parsed JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(AtomicError::invalid_atomic(format!(
                "atomic must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse one ledger line.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| AtomicError::parse(e))?;
        Self::from_value(value)
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Single-line JSON serialization, the on-disk form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.fields).map_err(|e| AtomicError::parse(e))
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    // ── Typed accessors over known fields ────────────────────────────────

    #[must_use]
    pub fn schema_version(&self) -> Option<&str> {
        self.get("schema_version").and_then(Value::as_str)
    }

    #[must_use]
    pub fn entity_type(&self) -> Option<&str> {
        self.get("entity_type").and_then(Value::as_str)
    }

    #[must_use]
    pub fn this(&self) -> Option<&Value> {
        self.get("this")
    }

    #[must_use]
    pub fn did(&self) -> Option<&Map<String, Value>> {
        self.get("did").and_then(Value::as_object)
    }

    #[must_use]
    pub fn actor(&self) -> Option<&str> {
        self.did().and_then(|d| d.get("actor")).and_then(Value::as_str)
    }

    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.did().and_then(|d| d.get("action")).and_then(Value::as_str)
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.get("metadata").and_then(Value::as_object)
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("trace_id"))
            .and_then(Value::as_str)
    }

    #[must_use]
    pub fn created_at_raw(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("created_at"))
            .and_then(Value::as_str)
    }

    /// Parsed `metadata.created_at`, when present and well-formed.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at_raw()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    #[must_use]
    pub fn owner_id(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("owner_id"))
            .and_then(Value::as_str)
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get("tenant_id"))
            .and_then(Value::as_str)
    }

    #[must_use]
    pub fn prev(&self) -> Option<&str> {
        self.get("prev").and_then(Value::as_str)
    }

    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        self.get("hash").and_then(Value::as_str)
    }

    #[must_use]
    pub fn signature(&self) -> Option<&Value> {
        self.get("signature")
    }

    /// Flat status label used by scan filters and stats.
    ///
    /// Accepts either a bare string `status` or a mapping with a `state` key.
    #[must_use]
    pub fn status_label(&self) -> Option<&str> {
        match self.get("status") {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(Value::Object(m)) => m.get("state").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn set_hash(&mut self, hash: &ContentHash) {
        self.insert("hash", Value::String(hash.to_lowercase()));
    }

    pub fn set_prev(&mut self, prev: &ContentHash) {
        self.insert("prev", Value::String(prev.to_lowercase()));
    }

    pub fn set_signature(&mut self, envelope: &SignatureEnvelope) {
        self.insert("signature", envelope.to_value());
    }

    /// Drop `hash`, `curr_hash`, and `signature` — the fields excluded from
    /// the hashing pre-image.
    pub fn clear_signing_fields(&mut self) {
        self.remove("hash");
        self.remove("curr_hash");
        self.remove("signature");
    }

    // ── Validation ───────────────────────────────────────────────────────

    /// Minimal check run by the store before append: non-empty
    /// `entity_type`, `this`, and `metadata.trace_id`.
    pub fn validate_for_append(&self) -> Result<()> {
        if self.entity_type().is_none_or(str::is_empty) {
            return Err(AtomicError::invalid_atomic("missing entity_type"));
        }
        if self.this().is_none() {
            return Err(AtomicError::invalid_atomic("missing this"));
        }
        if self.trace_id().is_none_or(str::is_empty) {
            return Err(AtomicError::invalid_atomic("missing metadata.trace_id"));
        }
        Ok(())
    }

    /// Full structural lint: every recognized field that is present must be
    /// well-formed, and every required field must be present.
    pub fn validate(&self) -> Result<()> {
        self.validate_for_append()?;

        match self.schema_version() {
            None => return Err(AtomicError::invalid_atomic("missing schema_version")),
            Some(raw) => {
                let version = semver::Version::parse(raw).map_err(|e| {
                    AtomicError::invalid_atomic(format!("schema_version: {e}"))
                })?;
                if version != semver::Version::new(1, 1, 0) {
                    return Err(AtomicError::invalid_atomic(format!(
                        "unsupported schema_version {raw}"
                    )));
                }
            }
        }

        if let Some(raw) = self.entity_type() {
            raw.parse::<EntityType>()?;
        }

        let did = self
            .did()
            .ok_or_else(|| AtomicError::invalid_atomic("missing did"))?;
        for key in ["actor", "action"] {
            if did.get(key).and_then(Value::as_str).is_none_or(str::is_empty) {
                return Err(AtomicError::invalid_atomic(format!("missing did.{key}")));
            }
        }

        if let Some(raw) = self.trace_id() {
            TraceId::parse(raw)
                .map_err(|_| AtomicError::invalid_atomic(format!("malformed trace_id {raw:?}")))?;
        }
        match self.created_at_raw() {
            None => return Err(AtomicError::invalid_atomic("missing metadata.created_at")),
            Some(raw) => {
                DateTime::parse_from_rfc3339(raw).map_err(|e| {
                    AtomicError::invalid_atomic(format!("metadata.created_at: {e}"))
                })?;
            }
        }

        for field in ["hash", "prev"] {
            if let Some(value) = self.get(field) {
                let raw = value.as_str().ok_or_else(|| {
                    AtomicError::invalid_atomic(format!("{field} must be a string"))
                })?;
                ContentHash::parse(raw).map_err(|_| {
                    AtomicError::invalid_atomic(format!("malformed {field} {raw:?}"))
                })?;
            }
        }

        if let Some(sig) = self.signature() {
            match sig {
                Value::Object(_) => {
                    SignatureEnvelope::from_value(sig).map_err(|e| {
                        AtomicError::invalid_atomic(format!("signature: {e}"))
                    })?;
                }
                // Legacy read-only form: a bare hex signature.
                Value::String(raw) => {
                    if raw.len() != 128 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return Err(AtomicError::invalid_atomic(
                            "legacy signature must be 128 hex chars",
                        ));
                    }
                }
                _ => {
                    return Err(AtomicError::invalid_atomic(
                        "signature must be an envelope object or hex string",
                    ))
                }
            }
        }

        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Builder for `Atomic`.
///
/// Fills schema defaults: `schema_version`, a generated v4 trace id, and a
/// `created_at` of now. Every optional field stays absent unless set.
pub struct AtomicBuilder {
    entity_type: EntityType,
    this: Value,
    actor: String,
    action: String,
    reason: Option<String>,
    intent: Option<String>,
    input: Option<Value>,
    payload: Option<Value>,
    output: Option<Value>,
    trace_id: Option<TraceId>,
    created_at: Option<DateTime<Utc>>,
    owner_id: Option<String>,
    tenant_id: Option<String>,
    parent_id: Option<String>,
    tags: Vec<String>,
    prev: Option<ContentHash>,
}

impl AtomicBuilder {
    pub fn new(
        entity_type: EntityType,
        this: impl Into<Value>,
        actor: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            this: this.into(),
            actor: actor.into(),
            action: action.into(),
            reason: None,
            intent: None,
            input: None,
            payload: None,
            output: None,
            trace_id: None,
            created_at: None,
            owner_id: None,
            tenant_id: None,
            parent_id: None,
            tags: Vec::new(),
            prev: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn input(mut self, v: Value) -> Self {
        self.input = Some(v);
        self
    }

    pub fn payload(mut self, v: Value) -> Self {
        self.payload = Some(v);
        self
    }

    pub fn output(mut self, v: Value) -> Self {
        self.output = Some(v);
        self
    }

    pub fn trace_id(mut self, id: TraceId) -> Self {
        self.trace_id = Some(id);
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn owner_id(mut self, id: impl Into<String>) -> Self {
        self.owner_id = Some(id.into());
        self
    }

    pub fn tenant_id(mut self, id: impl Into<String>) -> Self {
        self.tenant_id = Some(id.into());
        self
    }

    pub fn parent_id(mut self, id: impl Into<String>) -> Self {
        self.parent_id = Some(id.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn prev(mut self, prev: ContentHash) -> Self {
        self.prev = Some(prev);
        self
    }

    /// Build the atomic, unsigned and unhashed.
    #[must_use]
    pub fn build(self) -> Atomic {
        let mut did = Map::new();
        did.insert("actor".into(), Value::String(self.actor));
        did.insert("action".into(), Value::String(self.action));
        if let Some(reason) = self.reason {
            did.insert("reason".into(), Value::String(reason));
        }

        let mut metadata = Map::new();
        let trace_id = self.trace_id.unwrap_or_else(TraceId::generate);
        metadata.insert("trace_id".into(), Value::String(trace_id.as_str().into()));
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        metadata.insert(
            "created_at".into(),
            serde_json::to_value(created_at).unwrap_or(Value::Null),
        );
        if let Some(owner) = self.owner_id {
            metadata.insert("owner_id".into(), Value::String(owner));
        }
        if let Some(tenant) = self.tenant_id {
            metadata.insert("tenant_id".into(), Value::String(tenant));
        }
        if let Some(parent) = self.parent_id {
            metadata.insert("parent_id".into(), Value::String(parent));
        }
        if !self.tags.is_empty() {
            metadata.insert(
                "tags".into(),
                Value::Array(self.tags.into_iter().map(Value::String).collect()),
            );
        }

        let mut fields = Map::new();
        fields.insert("schema_version".into(), Value::String(SCHEMA_VERSION.into()));
        fields.insert(
            "entity_type".into(),
            Value::String(self.entity_type.as_str().into()),
        );
        fields.insert("this".into(), self.this);
        fields.insert("did".into(), Value::Object(did));
        if let Some(intent) = self.intent {
            fields.insert("intent".into(), Value::String(intent));
        }
        if let Some(input) = self.input {
            fields.insert("input".into(), input);
        }
        if let Some(payload) = self.payload {
            fields.insert("payload".into(), payload);
        }
        if let Some(output) = self.output {
            fields.insert("output".into(), output);
        }
        if let Some(prev) = self.prev {
            fields.insert("prev".into(), Value::String(prev.to_lowercase()));
        }
        fields.insert("metadata".into(), Value::Object(metadata));

        Atomic { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn built() -> Atomic {
        AtomicBuilder::new(EntityType::File, "src/main.rs", "user", "create").build()
    }

    #[test]
    fn test_builder_fills_schema_defaults() {
        let atomic = built();
        assert_eq!(atomic.schema_version(), Some(SCHEMA_VERSION));
        assert_eq!(atomic.entity_type(), Some("file"));
        assert_eq!(atomic.actor(), Some("user"));
        assert!(TraceId::parse(atomic.trace_id().unwrap()).is_ok());
        assert!(atomic.created_at().is_some());
    }

    #[test]
    fn test_built_atomic_passes_validation() {
        assert!(built().validate().is_ok());
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(Atomic::from_value(json!([1, 2, 3])).is_err());
        assert!(Atomic::from_value(json!("plain")).is_err());
    }

    #[test]
    fn test_unknown_fields_survive_roundtrip() {
        let mut atomic = built();
        atomic.insert("x_custom", json!({"nested": [1, 2]}));
        let encoded = atomic.to_json().unwrap();
        let decoded = Atomic::from_json(&encoded).unwrap();
        assert_eq!(decoded.get("x_custom"), Some(&json!({"nested": [1, 2]})));
    }

    #[test]
    fn test_validate_rejects_bad_entity_type() {
        let mut atomic = built();
        atomic.insert("entity_type", json!("starship"));
        assert!(atomic.validate().is_err());
        // The append-time check only requires the field to be non-empty.
        assert!(atomic.validate_for_append().is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed_prev() {
        let mut atomic = built();
        atomic.insert("prev", json!("not-a-hash"));
        assert!(atomic.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsupported_schema_version() {
        let mut atomic = built();
        atomic.insert("schema_version", json!("2.0.0"));
        assert!(atomic.validate().is_err());
    }

    #[test]
    fn test_status_label_accepts_both_shapes() {
        let mut atomic = built();
        atomic.insert("status", json!("done"));
        assert_eq!(atomic.status_label(), Some("done"));
        atomic.insert("status", json!({"state": "failed", "attempts": 2}));
        assert_eq!(atomic.status_label(), Some("failed"));
    }

    #[test]
    fn test_entity_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EntityType::Law).unwrap(), "\"law\"");
        assert_eq!("contract".parse::<EntityType>().unwrap(), EntityType::Contract);
        assert!("other".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_signature_envelope_roundtrip() {
        let envelope = SignatureEnvelope {
            alg: SIGNATURE_ALG.into(),
            public_key: "ab".repeat(32),
            sig: "cd".repeat(64),
            signed_at: Utc::now(),
        };
        let decoded = SignatureEnvelope::from_value(&envelope.to_value()).unwrap();
        assert_eq!(decoded.alg, "Ed25519");
        assert_eq!(decoded.public_key, envelope.public_key);
    }

    #[test]
    fn test_clear_signing_fields() {
        let mut atomic = built();
        atomic.insert("hash", json!("ee".repeat(32)));
        atomic.insert("curr_hash", json!("ee".repeat(32)));
        atomic.insert("signature", json!("ff".repeat(64)));
        atomic.clear_signing_fields();
        assert!(atomic.hash().is_none());
        assert!(atomic.get("curr_hash").is_none());
        assert!(atomic.signature().is_none());
    }
}
