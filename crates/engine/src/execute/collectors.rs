use std::collections::BTreeMap;

use serde_json::Value;

/// Per-request observations, keyed by service, exposed to the host's
/// `on_resolution` hook when the service opted in.
#[derive(Debug, Clone, Default)]
pub struct Collectors {
    pub status_codes: BTreeMap<String, Vec<u16>>,
    pub extensions: BTreeMap<String, Vec<Value>>,
}

impl Collectors {
    pub fn is_empty(&self) -> bool {
        self.status_codes.is_empty() && self.extensions.is_empty()
    }
}
