//! Ingress sender allowlist.
//!
//! Stored in the `security_cfg` KV namespace (with the config file value
//! as fallback) so it can be changed at runtime without a restart; the
//! cached copy reloads on a TTL. An empty list admits everyone.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mimi_core::kv::KvStore;

const NAMESPACE: &str = "security_cfg";
const KEY_ALLOW_FROM: &str = "allow_from";

struct Cached {
    allow_from: String,
    loaded_at: Option<Instant>,
}

pub struct Allowlist {
    kv: Arc<KvStore>,
    fallback: String,
    ttl: Duration,
    cached: Mutex<Cached>,
}

impl Allowlist {
    pub fn new(kv: Arc<KvStore>, fallback: String, ttl: Duration) -> Self {
        Self {
            kv,
            fallback,
            ttl,
            cached: Mutex::new(Cached {
                allow_from: String::new(),
                loaded_at: None,
            }),
        }
    }

    pub fn is_allowed(&self, sender_id: &str) -> bool {
        let mut cached = self.cached.lock().unwrap();
        if cached
            .loaded_at
            .map(|t| t.elapsed() >= self.ttl)
            .unwrap_or(true)
        {
            cached.allow_from = self
                .kv
                .get_str(NAMESPACE, KEY_ALLOW_FROM)
                .ok()
                .flatten()
                .unwrap_or_else(|| self.fallback.clone());
            cached.loaded_at = Some(Instant::now());
        }
        matches(&cached.allow_from, sender_id)
    }
}

fn matches(allow_from: &str, sender_id: &str) -> bool {
    if allow_from.trim().is_empty() {
        return true;
    }
    allow_from
        .split(',')
        .map(str::trim)
        .any(|entry| !entry.is_empty() && entry == sender_id)
}
