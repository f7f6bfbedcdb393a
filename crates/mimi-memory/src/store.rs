//! `MEMORY.md` + `daily/<YYYY-MM-DD>.md` under the memory directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Days, Local, NaiveDate};
use tracing::debug;

use crate::error::{MemoryError, Result};

const LONG_TERM_FILE: &str = "MEMORY.md";
const DAILY_DIR: &str = "daily";

pub struct MemoryStore {
    dir: PathBuf,
    /// Byte cap on the long-term blob.
    long_term_max: usize,
}

impl MemoryStore {
    pub fn open(dir: impl AsRef<Path>, long_term_max: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(DAILY_DIR))?;
        Ok(Self { dir, long_term_max })
    }

    /// The long-term blob; empty string when none has been written yet.
    pub fn read_long_term(&self) -> Result<String> {
        match fs::read_to_string(self.dir.join(LONG_TERM_FILE)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the long-term blob. Oversized writes are rejected rather
    /// than silently truncated so the model learns to keep it organized.
    pub fn write_long_term(&self, text: &str) -> Result<()> {
        if text.len() > self.long_term_max {
            return Err(MemoryError::TooLarge {
                size: text.len(),
                max: self.long_term_max,
            });
        }
        fs::write(self.dir.join(LONG_TERM_FILE), text)?;
        debug!(bytes = text.len(), "long-term memory written");
        Ok(())
    }

    /// Append one note line to today's daily file.
    pub fn append_today(&self, note: &str) -> Result<()> {
        self.append_on(Local::now().date_naive(), note)
    }

    /// The last `days` daily notes (today included), newest first, each
    /// under a `### <date>` heading.
    pub fn read_recent(&self, days: u64) -> Result<String> {
        let today = Local::now().date_naive();
        let mut out = String::new();
        for back in 0..days {
            let Some(date) = today.checked_sub_days(Days::new(back)) else {
                break;
            };
            match fs::read_to_string(self.daily_path(date)) {
                Ok(text) if !text.trim().is_empty() => {
                    out.push_str(&format!("### {}\n{}\n", date, text.trim_end()));
                    out.push('\n');
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    fn append_on(&self, date: NaiveDate, note: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.daily_path(date))?;
        writeln!(file, "- {}", note.trim())?;
        Ok(())
    }

    fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(DAILY_DIR).join(format!("{date}.md"))
    }
}
