use indexmap::IndexMap;
use parking_lot::RwLock;

/// Cookies accumulated across the upstream calls of one client request.
///
/// A key, once set, is only ever replaced by a later non-empty value.
#[derive(Debug, Default)]
pub struct SessionCredentials {
    values: RwLock<IndexMap<String, String>>,
}

impl SessionCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.values.write().insert(key.into(), value);
    }

    /// Merges every `Set-Cookie` of `resp` into the jar.
    pub fn absorb(&self, resp: &reqwest::Response) {
        let fresh: Vec<(String, String)> = resp
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();

        if fresh.is_empty() {
            return;
        }

        let mut values = self.values.write();
        for (name, value) in fresh {
            if value.is_empty() {
                continue;
            }
            tracing::trace!("credential updated: {}", name);
            values.insert(name, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// `k=v; k2=v2`, in insertion order.
    pub fn cookie_header(&self) -> String {
        self.values
            .read()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
