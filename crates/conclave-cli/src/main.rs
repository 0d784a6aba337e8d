mod config;

use crate::config::ConclaveConfig;
use clap::{Parser, Subcommand};
use conclave_agent::{AgentRuntime, OpenAiCapability, RuntimeEvent};
use conclave_channels::{ChannelManager, ConsoleChannel};
use conclave_core::{Message, MessageKind};
use conclave_memory::FileMemoryStore;
use conclave_orchestrator::{HandlerRegistry, SwarmCoordinator, TaskScheduler, TeamCoordinator};
use conclave_session::FileStateStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONSOLE_CHANNEL: &str = "console";

#[derive(Parser)]
#[command(name = "conclave", about = "Conclave: autonomous agent runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conclave.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent over stdin while scheduled tasks fire in the background
    Run,
    /// Validate the config file and print a summary
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so replies on stdout stay readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "Failed to load .env");
        }
    }

    let cli = Cli::parse();
    let config = ConclaveConfig::load(&cli.config).await?;
    config.validate()?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Check => check(config).await,
    }
}

async fn run(config: ConclaveConfig) -> anyhow::Result<()> {
    let states = Arc::new(FileStateStore::new(config.data_dir.join("sessions")).await?);
    let memory = Arc::new(FileMemoryStore::new(config.data_dir.join("memory.jsonl")).await?);
    let ai = Arc::new(OpenAiCapability::new(config.model.clone()));

    let runtime = AgentRuntime::builder(config.runtime.clone())
        .ai(ai)
        .state_store(states)
        .memory(memory)
        .build();

    let goals = Arc::new(config.goal_manager().await?);
    let scheduler = Arc::new(TaskScheduler::new(
        goals,
        runtime.sender(),
        config.scheduler.clone(),
    ));
    runtime.register_job(scheduler, config.scheduler.interval())?;

    let mut channels = ChannelManager::new();
    channels.add_channel(Box::new(ConsoleChannel::new()));

    // Replies leave the loop through events; count settled inputs so EOF can
    // wait for the queue to drain.
    let settled = Arc::new(AtomicUsize::new(0));
    let progress = Arc::new(Notify::new());
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Message>();
    {
        let settled = settled.clone();
        let progress = progress.clone();
        runtime.subscribe(move |event| {
            if settles_console_input(event) {
                settled.fetch_add(1, Ordering::SeqCst);
                progress.notify_one();
            }
            if let RuntimeEvent::MessageProcessed(exchange) = event {
                let _ = reply_tx.send(exchange.response.clone());
            }
        });
    }
    let printer = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            let outcome = match reply.channel() {
                Some(_) => channels.route(&reply).await,
                None => channels.deliver_to(CONSOLE_CHANNEL, &reply).await,
            };
            if let Err(e) = outcome {
                warn!(error = %e, "Reply delivery failed");
            }
        }
    });

    runtime.initialize().await?;
    info!(
        conversation_id = %config.runtime.conversation_id,
        goals = config.goals.len(),
        tasks = config.tasks.len(),
        "Conclave running; type a message, Ctrl-D to exit"
    );

    let mut sent = 0usize;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    runtime.enqueue(Message::user(text).with_kind(MessageKind::Channel {
                        channel: CONSOLE_CHANNEL.into(),
                        sender_id: "stdin".into(),
                    }))?;
                    sent += 1;
                }
                None => break false,
            },
            _ = tokio::signal::ctrl_c() => break true,
        }
    };

    if !interrupted {
        while settled.load(Ordering::SeqCst) < sent {
            tokio::select! {
                () = progress.notified() => {}
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    runtime.shutdown().await?;
    drop(runtime);
    if tokio::time::timeout(Duration::from_secs(2), printer).await.is_err() {
        warn!("Timed out flushing replies");
    }
    Ok(())
}

/// Whether `event` finishes a line read from stdin, successfully or not.
fn settles_console_input(event: &RuntimeEvent) -> bool {
    match event {
        RuntimeEvent::MessageProcessed(exchange) => {
            exchange.input.channel() == Some(CONSOLE_CHANNEL)
        }
        RuntimeEvent::Error {
            stage,
            input_kind: Some(MessageKind::Channel { channel, .. }),
            ..
        } => stage == "process" && channel == CONSOLE_CHANNEL,
        _ => false,
    }
}

async fn check(config: ConclaveConfig) -> anyhow::Result<()> {
    let handlers = Arc::new(HandlerRegistry::new());
    SwarmCoordinator::new(config.swarm.clone(), handlers.clone())?;
    let teams = TeamCoordinator::new(handlers);
    for team in &config.teams {
        teams.create_team(team.clone()).await?;
    }
    let goals = config.goal_manager().await?;

    println!("Config OK");
    println!(
        "  runtime: conversation '{}', context window {}",
        config.runtime.conversation_id, config.runtime.max_context_size
    );
    println!("  model: {} at {}", config.model.model_id, config.model.base_url());
    println!(
        "  scheduler: every {}s, up to {} task(s) per cycle",
        config.scheduler.interval_secs, config.scheduler.batch_size
    );
    println!(
        "  swarm: {}..={} agents, consensus threshold {}",
        config.swarm.min_agents, config.swarm.max_agents, config.swarm.consensus_threshold
    );
    println!("  goals: {}", goals.goals().await.len());
    for goal in goals.goals().await {
        let tasks = goals.tasks_for_goal(&goal.id).await;
        println!("    {} ({} task(s)): {}", goal.id, tasks.len(), goal.description);
    }
    println!("  teams: {}", config.teams.len());
    for team_id in teams.team_ids().await {
        let status = teams.get_team_status(&team_id).await?;
        println!(
            "    {team_id}: {} member(s), hierarchy depth {}",
            status.metrics.total_members, status.metrics.hierarchy_depth
        );
    }
    if config.model.api_key.is_empty() {
        println!("  warning: no API key set (model.api_key or {})", crate::config::API_KEY_ENV);
    }
    Ok(())
}
