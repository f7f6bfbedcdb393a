//! Small persistent key/value store, one JSON file per namespace.
//!
//! Backs the state that must survive a restart without deserving a real
//! database: the cron compatibility schedule, cached credentials, the
//! sender allowlist. Writes go through a temp file + rename so a crash
//! mid-write never corrupts the namespace.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{MimiError, Result};

pub struct KvStore {
    root: PathBuf,
    // Serializes read-modify-write cycles across namespaces.
    write_lock: Mutex<()>,
}

impl KvStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .load(namespace)?
            .get(key)
            .and_then(|v| v.as_str().map(String::from)))
    }

    pub fn set_str(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.update(namespace, key, Some(Value::String(value.to_string())))
    }

    pub fn get_u16(&self, namespace: &str, key: &str) -> Result<Option<u16>> {
        Ok(self
            .load(namespace)?
            .get(key)
            .and_then(|v| v.as_u64())
            .and_then(|v| u16::try_from(v).ok()))
    }

    pub fn set_u16(&self, namespace: &str, key: &str, value: u16) -> Result<()> {
        self.update(namespace, key, Some(Value::from(value)))
    }

    pub fn get_i64(&self, namespace: &str, key: &str) -> Result<Option<i64>> {
        Ok(self.load(namespace)?.get(key).and_then(|v| v.as_i64()))
    }

    pub fn set_i64(&self, namespace: &str, key: &str, value: i64) -> Result<()> {
        self.update(namespace, key, Some(Value::from(value)))
    }

    /// Remove a key. Removing a missing key is not an error.
    pub fn erase(&self, namespace: &str, key: &str) -> Result<()> {
        self.update(namespace, key, None)
    }

    fn namespace_path(&self, namespace: &str) -> Result<PathBuf> {
        if namespace.is_empty()
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(MimiError::Config(format!(
                "invalid kv namespace: {namespace:?}"
            )));
        }
        Ok(self.root.join(format!("{namespace}.json")))
    }

    fn load(&self, namespace: &str) -> Result<BTreeMap<String, Value>> {
        let path = self.namespace_path(namespace)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, namespace: &str, key: &str, value: Option<Value>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut map = self.load(namespace)?;
        match value {
            Some(v) => {
                map.insert(key.to_string(), v);
            }
            None => {
                map.remove(key);
            }
        }

        let path = self.namespace_path(namespace)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&map)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
