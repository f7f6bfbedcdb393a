//! System-prompt assembly: fixed identity preamble, bootstrap config
//! files, long-term memory, recent daily notes, and the per-turn context
//! block. The result is capped at the configured buffer size.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use mimi_bus::BusMessage;
use mimi_memory::MemoryStore;

pub const SOUL_FILE: &str = "SOUL.md";
pub const USER_FILE: &str = "USER.md";
pub const AGENTS_FILE: &str = "AGENTS.md";
pub const TOOLS_FILE: &str = "TOOLS.md";
pub const SKILLS_FILE: &str = "SKILLS.md";
pub const IDENTITY_FILE: &str = "IDENTITY.md";

/// Bootstrap files in assembly order, with their prompt headers.
const BOOTSTRAP_FILES: &[(&str, &str)] = &[
    (SOUL_FILE, "Personality"),
    (USER_FILE, "User Info"),
    (AGENTS_FILE, "Behavior Rules"),
    (TOOLS_FILE, "Tool Rules"),
    (SKILLS_FILE, "Skill Rules"),
    (IDENTITY_FILE, "Identity"),
];

const PREAMBLE: &str = "\
# Mimi\n\n\
You are Mimi, a personal AI assistant running on a small always-on home device.\n\
You communicate through Telegram, WebSocket, voice, and a local CLI.\n\n\
Be helpful, accurate, and concise.\n\n\
## Available Tools\n\
You have access to the following tools:\n\
- web_search: Search the web for current information. \
Use this when you need up-to-date facts, news, weather, or anything beyond your training data.\n\
- get_current_time: Get the current date and time. \
You do NOT have an internal clock — always use this tool when you need to know the time or date.\n\
- read_file: Read a file under the data directory.\n\
- write_file: Write/overwrite a file under the memory directory.\n\
- list_dir: List files under the data directory.\n\n\
- memory_write_long_term: Overwrite memory/MEMORY.md with organized long-term memory.\n\
- memory_append_today: Append a concise note to memory/daily/<YYYY-MM-DD>.md.\n\n\
- set_volume: Set speaker volume (0-100) for voice playback loudness.\n\
- get_volume: Get current speaker volume percentage.\n\n\
- cron_set / cron_clear: Manage the single recurring scheduled task.\n\n\
Use tools when needed. Provide your final answer as text after using tools.\n\n\
Bootstrap config files may add extra behavior constraints, tool rules, and identity guidance.\n\n\
When responding to voice input, use short, natural Chinese sentences that can be spoken aloud. \
Do not reply with emoji-only or symbol-only content.\n\n\
## Memory\n\
You have persistent memory stored on local disk:\n\
- Long-term memory: memory/MEMORY.md\n\
- Daily notes: memory/daily/<YYYY-MM-DD>.md\n\n\
IMPORTANT: Actively use memory to remember things across conversations.\n\
- When you learn something new about the user (name, preferences, habits, context), write it to MEMORY.md.\n\
- When something noteworthy happens in a conversation, append it to today's daily note.\n\
- Prefer memory_write_long_term and memory_append_today for memory updates (do not rely on generic file tools for routine memory writes).\n\
- Use get_current_time to know today's date before writing daily notes.\n\
- Keep MEMORY.md concise and organized — summarize, don't dump raw conversation.\n\
- You should proactively save memory without being asked. If the user tells you their name, preferences, or important facts, persist them immediately.\n";

pub struct PromptBuilder {
    config_dir: PathBuf,
    memory: Arc<MemoryStore>,
    max_bytes: usize,
}

impl PromptBuilder {
    pub fn new(config_dir: PathBuf, memory: Arc<MemoryStore>, max_bytes: usize) -> Self {
        Self {
            config_dir,
            memory,
            max_bytes,
        }
    }

    pub fn build(&self) -> String {
        let mut prompt = String::with_capacity(self.max_bytes.min(16 * 1024));
        prompt.push_str(PREAMBLE);

        for (file, header) in BOOTSTRAP_FILES {
            if let Ok(content) = std::fs::read_to_string(self.config_dir.join(file)) {
                if !content.trim().is_empty() {
                    prompt.push_str(&format!("\n## {header}\n\n{}\n", content.trim_end()));
                }
            }
        }

        if let Ok(long_term) = self.memory.read_long_term() {
            if !long_term.is_empty() {
                prompt.push_str(&format!("\n## Long-term Memory\n\n{long_term}\n"));
            }
        }
        if let Ok(recent) = self.memory.read_recent(3) {
            if !recent.is_empty() {
                prompt.push_str(&format!("\n## Recent Notes\n\n{recent}\n"));
            }
        }

        truncate_at_boundary(&mut prompt, self.max_bytes);
        debug!(bytes = prompt.len(), "system prompt built");
        prompt
    }
}

/// Per-turn context appended after assembly so the model knows where the
/// message came from and where replies must go.
pub fn append_turn_context(prompt: &mut String, msg: &BusMessage, max_bytes: usize) {
    prompt.push_str(&format!(
        "\n## Current Turn Context\n\
         - source_channel: {}\n\
         - source_chat_id: {}\n\
         - When scheduling follow-ups this turn, deliver results back to source_chat_id.\n\
         - Never use chat_id 'cron' for user-facing messages.\n",
        msg.channel,
        if msg.chat_id.is_empty() {
            "(empty)"
        } else {
            &msg.chat_id
        }
    ));
    truncate_at_boundary(prompt, max_bytes);
}

fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
