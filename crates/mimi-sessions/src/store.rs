//! File-backed session store.
//!
//! A session is the ordered list of (role, text) turns for one chat id,
//! created lazily on first append and capped at a fixed retained length.
//! Each session lives in its own JSON file so a corrupted conversation
//! never takes the others with it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::Result;
use crate::types::{Role, Turn};

pub struct SessionStore {
    dir: PathBuf,
    /// Max retained turns per session (entries, not pairs).
    max_turns: usize,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn open(dir: impl AsRef<Path>, max_turns: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_turns: max_turns.max(1),
            write_lock: Mutex::new(()),
        })
    }

    /// Append one turn, trimming the oldest entries past the retained cap.
    pub fn append(&self, chat_id: &str, role: Role, text: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut turns = self.load(chat_id)?;
        turns.push(Turn {
            role,
            text: text.to_string(),
        });
        if turns.len() > self.max_turns {
            let excess = turns.len() - self.max_turns;
            turns.drain(..excess);
        }
        self.save(chat_id, &turns)?;
        debug!(chat_id, turns = turns.len(), "session appended");
        Ok(())
    }

    /// The most recent `max_turns` entries, oldest first. `None` returns
    /// everything retained.
    pub fn history(&self, chat_id: &str, max_turns: Option<usize>) -> Result<Vec<Turn>> {
        let turns = self.load(chat_id)?;
        Ok(match max_turns {
            Some(n) if n < turns.len() => turns[turns.len() - n..].to_vec(),
            _ => turns,
        })
    }

    /// History serialized as the LLM wire shape:
    /// `[{"role": "...", "content": "..."}, …]`.
    pub fn history_json(&self, chat_id: &str, max_turns: Option<usize>) -> Result<String> {
        let turns = self.history(chat_id, max_turns)?;
        let wire: Vec<serde_json::Value> = turns
            .iter()
            .map(|t| serde_json::json!({ "role": t.role.as_str(), "content": t.text }))
            .collect();
        Ok(serde_json::to_string(&wire)?)
    }

    /// Delete a session. Clearing a missing session is not an error.
    pub fn clear(&self, chat_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        match fs::remove_file(self.path_for(chat_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Chat ids with a persisted session, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn path_for(&self, chat_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(chat_id)))
    }

    fn load(&self, chat_id: &str) -> Result<Vec<Turn>> {
        match fs::read_to_string(self.path_for(chat_id)) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, chat_id: &str, turns: &[Turn]) -> Result<()> {
        let path = self.path_for(chat_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(turns)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Keep chat ids filesystem-safe; anything exotic maps to '_'.
fn sanitize(chat_id: &str) -> String {
    chat_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_enumerate_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), 100).unwrap();

        store.append("c1", Role::User, "今天几号？").unwrap();
        store.append("c1", Role::Assistant, "今天是2026-08-01。").unwrap();
        store.append("c1", Role::User, "谢谢").unwrap();

        let turns = store.history("c1", None).unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].text, "今天几号？");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[2].text, "谢谢");
    }

    #[test]
    fn retained_length_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), 4).unwrap();

        for i in 0..6 {
            store.append("c1", Role::User, &format!("m{i}")).unwrap();
        }
        let turns = store.history("c1", None).unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].text, "m2");
        assert_eq!(turns[3].text, "m5");
    }

    #[test]
    fn history_json_is_wire_shaped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), 20).unwrap();
        store.append("c1", Role::User, "hi").unwrap();
        store.append("c1", Role::Assistant, "hello").unwrap();

        let json = store.history_json("c1", None).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["role"], "user");
        assert_eq!(parsed[1]["content"], "hello");
    }

    #[test]
    fn clear_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), 20).unwrap();
        store.append("alpha", Role::User, "x").unwrap();
        store.append("beta", Role::User, "y").unwrap();

        assert_eq!(store.list().unwrap(), vec!["alpha", "beta"]);
        store.clear("alpha").unwrap();
        store.clear("alpha").unwrap();
        assert_eq!(store.list().unwrap(), vec!["beta"]);
        assert!(store.history("alpha", None).unwrap().is_empty());
    }

    #[test]
    fn hostile_chat_ids_stay_inside_the_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), 20).unwrap();
        store.append("../../etc/passwd", Role::User, "x").unwrap();
        let ids = store.list().unwrap();
        assert_eq!(ids.len(), 1);
        assert!(!ids[0].contains('/'));
    }
}
