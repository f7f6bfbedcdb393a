//! The `mimi` binary: loads config, wires the bus, control plane,
//! orchestrator, dispatcher, and schedulers, then serves a local CLI
//! conversation on stdin until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use mimi_agent::tools::{
    cron::{CronClearTool, CronSetTool},
    files::{ListDirTool, ReadFileTool, WriteFileTool},
    memory::{MemoryAppendTodayTool, MemoryWriteLongTermTool},
    search::WebSearchTool,
    time::CurrentTimeTool,
    volume::{GetVolumeTool, SetVolumeTool},
    Tool,
};
use mimi_agent::{hints::HintEngine, prompt::PromptBuilder};
use mimi_agent::{AnthropicModel, ChatModel, Orchestrator, StatsTracker, ToolRegistry};
use mimi_bus::{BusMessage, Channel, MessageBus};
use mimi_control::ControlPlane;
use mimi_core::device::{HostControl, SoftVolume, VoiceBackend, VolumeSink};
use mimi_core::kv::KvStore;
use mimi_core::MimiConfig;
use mimi_dispatch::{ChannelSink, Dispatcher, SendFailureHook};
use mimi_memory::MemoryStore;
use mimi_scheduler::{CronService, HeartbeatService};
use mimi_sessions::SessionStore;

mod access;
mod sinks;

use access::Allowlist;
use sinks::{CliSink, LoggingVoice, ProcessHost, StatsFailureHook};

const ALLOWLIST_RELOAD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "mimi", about = "Mimi personal assistant runtime")]
struct Args {
    /// Path to mimi.toml (default: ~/.mimi/mimi.toml, MIMI_CONFIG env).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("MIMI_CONFIG").ok());
    let config = MimiConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        MimiConfig::default()
    });

    info!(data_dir = %config.paths.data_dir, "mimi runtime starting");
    std::fs::create_dir_all(config.paths.config_dir())?;

    // Stores and device collaborators.
    let kv = Arc::new(KvStore::open(config.paths.kv_dir())?);
    let bus = Arc::new(MessageBus::new(config.bus.clone()));
    let volume: Arc<dyn VolumeSink> = Arc::new(SoftVolume::default());
    let voice: Arc<dyn VoiceBackend> = Arc::new(LoggingVoice);
    let host: Arc<dyn HostControl> = Arc::new(ProcessHost);
    let sessions = Arc::new(SessionStore::open(
        config.paths.session_dir(),
        config.session.max_msgs,
    )?);
    let memory = Arc::new(MemoryStore::open(config.paths.memory_dir(), 16 * 1024)?);

    let control = Arc::new(ControlPlane::new(
        config.control.clone(),
        Arc::clone(&bus),
        Arc::clone(&volume),
        Arc::clone(&voice),
        Arc::clone(&host),
    ));

    let cron = Arc::new(CronService::new(
        config.cron.clone(),
        Arc::clone(&bus),
        Arc::clone(&kv),
        config.paths.config_dir(),
    ));
    let heartbeat = Arc::new(HeartbeatService::new(
        config.heartbeat.clone(),
        Arc::clone(&bus),
        config.paths.config_dir(),
    ));

    // Tool registry.
    let data_root = Arc::new(PathBuf::from(&config.paths.data_dir));
    let memory_root = Arc::new(config.paths.memory_dir());
    let tools: Vec<Box<dyn Tool>> = vec![
        Box::new(CurrentTimeTool),
        Box::new(WebSearchTool::new(config.search.api_key.clone())),
        Box::new(ReadFileTool::new(Arc::clone(&data_root))),
        Box::new(WriteFileTool::new(Arc::clone(&memory_root))),
        Box::new(ListDirTool::new(Arc::clone(&data_root))),
        Box::new(MemoryWriteLongTermTool::new(Arc::clone(&memory))),
        Box::new(MemoryAppendTodayTool::new(Arc::clone(&memory))),
        Box::new(GetVolumeTool::new(Arc::clone(&volume))),
        Box::new(SetVolumeTool::new(Arc::clone(&volume))),
        Box::new(CronSetTool::new(Arc::clone(&cron))),
        Box::new(CronClearTool::new(Arc::clone(&cron))),
    ];
    let tools = Arc::new(ToolRegistry::new(tools));

    let prompt = PromptBuilder::new(
        config.paths.config_dir(),
        Arc::clone(&memory),
        config.agent.context_buf_size,
    );
    let hint_engine = HintEngine::new(
        config.paths.config_dir(),
        config.agent.route_hint_reload_ms,
        config.agent.skill_rule_reload_ms,
    );
    let model: Arc<dyn ChatModel> = Arc::new(AnthropicModel::new(&config.llm));
    if config.llm.api_key.is_empty() {
        warn!("llm.api_key is empty — LLM turns will fail until it is configured");
    }

    let stats = Arc::new(StatsTracker::new());
    let orchestrator = Arc::new(Orchestrator::new(
        config.agent.clone(),
        config.session.max_msgs,
        Arc::clone(&bus),
        Arc::clone(&control),
        Arc::clone(&sessions),
        prompt,
        hint_engine,
        model,
        tools,
        Arc::clone(&stats),
    ));

    let failure_hook: Arc<dyn SendFailureHook> =
        Arc::new(StatsFailureHook::new(Arc::clone(&stats)));
    let mut dispatcher = Dispatcher::new(
        config.bus.clone(),
        Arc::clone(&bus),
        Arc::clone(&voice),
        failure_hook,
    );
    dispatcher.register(Channel::Cli, Arc::new(CliSink) as Arc<dyn ChannelSink>);
    let dispatcher = Arc::new(dispatcher);

    // Spawn the long-running tasks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(Arc::clone(&orchestrator).run(shutdown_rx.clone())));
    tasks.push(tokio::spawn(Arc::clone(&dispatcher).run(shutdown_rx.clone())));
    if config.cron.enabled {
        tasks.push(tokio::spawn(Arc::clone(&cron).run(shutdown_rx.clone())));
    }
    if config.heartbeat.enabled {
        tasks.push(tokio::spawn(Arc::clone(&heartbeat).run(shutdown_rx.clone())));
    }

    let allowlist = Allowlist::new(
        Arc::clone(&kv),
        config.access.allow_from.clone(),
        ALLOWLIST_RELOAD,
    );

    info!("mimi ready — type a message, ctrl-c to exit");
    cli_loop(&bus, &allowlist).await;

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = tokio::time::timeout(Duration::from_secs(3), task).await;
    }
    info!(stats = ?stats.snapshot(), "bye");
    Ok(())
}

/// Stdin ingress: each line becomes one CLI-channel turn.
async fn cli_loop(bus: &MessageBus, allowlist: &Allowlist) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if !allowlist.is_allowed("local") {
                            warn!("local sender not in allowlist, dropping input");
                            continue;
                        }
                        let msg = BusMessage::text(Channel::Cli, "local", line);
                        if let Err(e) = bus.push_inbound(msg).await {
                            warn!(error = %e, "inbound enqueue failed");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}
