use serde_json::{
    Map,
    Value as JsonValue,
};

/// Top-level keys stripped from a payload before it is handed to a
/// destination that keeps its own copy of `ComputeServers`/`DataStores`
/// (`UseSecretStore == true` on the target compute server). Mirrors the
/// Python original's secret-scrubbing pass in `faasr_payload.py`, which
/// drops the same two sections rather than replacing individual values.
pub const SECRET_SECTIONS: &[&str] = &["ComputeServers", "DataStores"];

/// A workflow payload as seen by a single action: an immutable `base`
/// document plus a mutable `overwritten` overlay. Lookups check the
/// overlay first and fall through to `base`; writes only ever touch the
/// overlay, and only the overlay — never the merged view — is what gets
/// propagated to a successor's `OVERWRITTEN` input. See SPEC_FULL.md
/// section 3, "Overlay/base payload model".
#[derive(Debug, Clone)]
pub struct Payload {
    base: JsonValue,
    overlay: Map<String, JsonValue>,
}

impl Payload {
    pub fn new(base: JsonValue, overlay: Map<String, JsonValue>) -> Self {
        Self { base, overlay }
    }

    pub fn base(&self) -> &JsonValue {
        &self.base
    }

    pub fn overlay(&self) -> &Map<String, JsonValue> {
        &self.overlay
    }

    /// Overlay value if present, else the base document's top-level value.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.overlay.get(key).or_else(|| self.base.get(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.overlay.contains_key(key) || self.base.get(key).is_some()
    }

    /// Writes always land in the overlay; `base` is never mutated.
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.overlay.insert(key.into(), value);
    }

    /// The overlay to carry forward to a successor invocation, serialized
    /// as the `OVERWRITTEN` argument.
    pub fn overlay_json(&self) -> JsonValue {
        JsonValue::Object(self.overlay.clone())
    }

    /// Drops `ComputeServers`/`DataStores` from the overlay before it is
    /// handed to a destination whose compute server has
    /// `UseSecretStore == true`. The destination already holds its own
    /// copy of these sections via its own secret store, so they are
    /// never transmitted over the wire. No-op if neither section is
    /// present in the overlay.
    pub fn scrub_secrets_for_dispatch(&self) -> Map<String, JsonValue> {
        let mut scrubbed = self.overlay.clone();
        for section in SECRET_SECTIONS {
            scrubbed.remove(*section);
        }
        scrubbed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_shadows_base() {
        let base = json!({ "FunctionInvoke": "f1", "ComputeServers": {} });
        let mut overlay = Map::new();
        overlay.insert("FunctionInvoke".to_string(), json!("f2"));
        let payload = Payload::new(base, overlay);

        assert_eq!(payload.get("FunctionInvoke"), Some(&json!("f2")));
        assert_eq!(payload.get("ComputeServers"), Some(&json!({})));
    }

    #[test]
    fn set_never_touches_base() {
        let base = json!({ "FunctionInvoke": "f1" });
        let mut payload = Payload::new(base.clone(), Map::new());
        payload.set("FunctionInvoke", json!("f2"));

        assert_eq!(payload.base(), &base);
        assert_eq!(payload.get("FunctionInvoke"), Some(&json!("f2")));
    }

    #[test]
    fn scrub_drops_secret_sections_only() {
        let mut overlay = Map::new();
        overlay.insert("ComputeServers".to_string(), json!({ "my_server": {} }));
        overlay.insert("DataStores".to_string(), json!({ "my_store": {} }));
        overlay.insert("FunctionInvoke".to_string(), json!("f2"));
        let payload = Payload::new(json!({}), overlay);

        let scrubbed = payload.scrub_secrets_for_dispatch();
        assert!(!scrubbed.contains_key("ComputeServers"));
        assert!(!scrubbed.contains_key("DataStores"));
        assert_eq!(scrubbed.get("FunctionInvoke"), Some(&json!("f2")));
    }
}
