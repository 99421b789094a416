//! Cache key generation.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::client::CompletionRequest;

/// Derive a deterministic cache key from a namespace and request parameters.
///
/// Object keys are sorted recursively before hashing, so two mappings with the
/// same entries in a different insertion order produce the same key.
pub fn build_key(namespace: &str, params: &Map<String, Value>) -> String {
    CacheKeyBuilder::new().build(namespace, params)
}

/// Recursively rebuild `value` with object keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder {
    salt: Option<String>,
}

impl CacheKeyBuilder {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Mix a fixed salt into every key (e.g. to invalidate after a prompt-format change).
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn build(&self, namespace: &str, params: &Map<String, Value>) -> String {
        let mut envelope = Map::new();
        envelope.insert("namespace".into(), Value::String(namespace.to_string()));
        envelope.insert("params".into(), Value::Object(params.clone()));
        if let Some(ref s) = self.salt {
            envelope.insert("salt".into(), Value::String(s.clone()));
        }
        // serde_json without `preserve_order` already sorts, but the canonical
        // form must not depend on that feature being off.
        let canonical = canonicalize(&Value::Object(envelope)).to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Params mapping for a completion request: provider, model, messages and
    /// every request-shaping parameter. Extras live under their own `extra`
    /// object so they can never shadow the named fields.
    pub fn params_for(request: &CompletionRequest) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("provider".into(), Value::String(request.provider.clone()));
        params.insert("model".into(), Value::String(request.model.clone()));
        params.insert(
            "messages".into(),
            serde_json::to_value(&request.messages).unwrap_or(Value::Null),
        );
        if let Some(t) = request.temperature {
            params.insert("temperature".into(), Value::from(t));
        }
        if let Some(m) = request.max_tokens {
            params.insert("max_tokens".into(), Value::from(m));
        }
        if !request.extra.is_empty() {
            params.insert("extra".into(), Value::Object(request.extra.clone()));
        }
        params
    }

    pub fn from_request(&self, namespace: &str, request: &CompletionRequest) -> String {
        self.build(namespace, &Self::params_for(request))
    }
}
