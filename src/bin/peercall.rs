//! Peercall CLI binary.
//!
//! Order-independent call negotiation over an untrusted relay.
//!
//! # Commands
//!
//! - `simulate` - Run two in-process agents through a negotiation scenario
//! - `inspect` - Parse a relay JSON message and classify it
//! - `config` - Print the effective configuration

use std::io::{self, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use peercall::{
    negotiation::{LocalDescription, MediaOp},
    AgentEvent, AgentHandle, CallAgent, CallError, Config, Effect, IceCandidate, LocalRelay, LoopbackMedia,
    NegotiationState, Outcome, Participant, RelayMessage, SessionDescription,
    SessionLifecycleManager, SessionNotice, TieBreak, VERSION,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a scenario step may take before the simulation gives up
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "peercall")]
#[command(version = VERSION)]
#[command(about = "Peercall - order-independent call negotiation", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/peercall/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run two agents through a negotiation scenario
    Simulate {
        /// Scenario (call, glare, early-candidates, hangup, roster-drop, busy, all)
        #[arg(default_value = "all")]
        scenario: String,

        /// Glare rule (lower-yields, higher-yields)
        #[arg(short, long)]
        tie_break: Option<String>,

        /// Artificial delay for offer/answer creation in milliseconds
        #[arg(short, long, default_value = "0")]
        latency_ms: u64,
    },

    /// Parse a relay JSON message and classify it
    Inspect {
        /// JSON input (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Simulation scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Call,
    Glare,
    EarlyCandidates,
    Hangup,
    RosterDrop,
    Busy,
    All,
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "call" => Ok(Self::Call),
            "glare" => Ok(Self::Glare),
            "early-candidates" | "early" => Ok(Self::EarlyCandidates),
            "hangup" => Ok(Self::Hangup),
            "roster-drop" | "leave" => Ok(Self::RosterDrop),
            "busy" => Ok(Self::Busy),
            "all" => Ok(Self::All),
            _ => Err(format!(
                "Unknown scenario: {s}. Use: call, glare, early-candidates, hangup, roster-drop, busy, all"
            )),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            scenario,
            tie_break,
            latency_ms,
        } => cmd_simulate(config, &scenario, tie_break, latency_ms),

        Commands::Inspect { input, file } => cmd_inspect(input, file),

        Commands::Config => cmd_config(&config),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}

fn cmd_simulate(
    mut config: Config,
    scenario: &str,
    tie_break: Option<String>,
    latency_ms: u64,
) -> anyhow::Result<()> {
    let scenario = Scenario::from_str(scenario).map_err(anyhow::Error::msg)?;
    if let Some(rule) = tie_break {
        config.negotiation.tie_break = TieBreak::from_str(&rule).map_err(anyhow::Error::msg)?;
    }
    let latency = Duration::from_millis(latency_ms);

    let scenarios = match scenario {
        Scenario::All => vec![
            Scenario::Call,
            Scenario::Glare,
            Scenario::EarlyCandidates,
            Scenario::Hangup,
            Scenario::RosterDrop,
            Scenario::Busy,
        ],
        one => vec![one],
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        for scenario in scenarios {
            println!("=== {scenario:?} (tie-break: {}) ===", config.negotiation.tie_break);
            match scenario {
                Scenario::EarlyCandidates => early_candidates(&config)?,
                other => run_agents(other, &config, latency).await?,
            }
            println!();
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

struct SimPeer {
    handle: AgentHandle,
    printer: JoinHandle<()>,
    agent: JoinHandle<()>,
}

async fn spawn_peer(
    relay: &LocalRelay,
    name: &str,
    config: &Config,
    latency: Duration,
) -> anyhow::Result<SimPeer> {
    let media = LoopbackMedia::new(name, config.media.clone()).with_latency(latency);
    let (handle, events, agent) =
        CallAgent::connect(relay, Participant::new(name)?, config, Arc::new(media)).await?;
    let printer = tokio::spawn(print_events(name.to_string(), events));
    Ok(SimPeer {
        handle,
        printer,
        agent,
    })
}

async fn print_events(name: String, mut events: mpsc::UnboundedReceiver<AgentEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::StateChanged { remote, from, to } => {
                println!("  [{name}] {from} -> {to} (with {remote})");
            },
            AgentEvent::Notice(notice) => println!("  [{name}] {}", describe(&notice)),
            AgentEvent::Roster(roster) => {
                let names: Vec<&str> = roster.iter().map(Participant::as_str).collect();
                println!("  [{name}] online: [{}]", names.join(", "));
            },
            AgentEvent::Forwarded(message) => {
                println!("  [{name}] forwarded {}", message.event_name());
            },
        }
    }
}

fn describe(notice: &SessionNotice) -> String {
    match notice {
        SessionNotice::CallFailed { remote, reason } => format!("call with {remote} failed: {reason}"),
        SessionNotice::CallEnded { remote, by_remote } => {
            let who = if *by_remote { "remote" } else { "local" };
            format!("call with {remote} ended ({who} hangup)")
        },
        SessionNotice::CallRejected { from } => format!("{from} rejected the call"),
        SessionNotice::Busy { from } => format!("busy, rejected call from {from}"),
        SessionNotice::CandidateRejected { remote, reason } => {
            format!("candidate from {remote} rejected: {reason}")
        },
    }
}

async fn wait_for(handle: &AgentHandle, state: NegotiationState) -> anyhow::Result<()> {
    let poll = async {
        loop {
            if handle.snapshot().await?.state == state {
                return Ok::<(), anyhow::Error>(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(STEP_TIMEOUT, poll)
        .await
        .map_err(|_| anyhow::anyhow!("{} never reached {state}", handle.local()))?
}

async fn wait_online(handle: &AgentHandle, others: &[&Participant]) -> anyhow::Result<()> {
    let poll = async {
        loop {
            let roster = handle.snapshot().await?.roster;
            if others.iter().all(|p| roster.contains(p)) {
                return Ok::<(), anyhow::Error>(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(STEP_TIMEOUT, poll)
        .await
        .map_err(|_| anyhow::anyhow!("roster of {} never settled", handle.local()))?
}

async fn run_agents(scenario: Scenario, config: &Config, latency: Duration) -> anyhow::Result<()> {
    let (relay, relay_task) = LocalRelay::spawn();
    let alice = spawn_peer(&relay, "alice", config, latency).await?;
    let bob = spawn_peer(&relay, "bob", config, latency).await?;
    let alice_id = alice.handle.local().clone();
    let bob_id = bob.handle.local().clone();
    wait_online(&alice.handle, &[&bob_id]).await?;
    wait_online(&bob.handle, &[&alice_id]).await?;

    match scenario {
        Scenario::Call => {
            alice.handle.start_call(Some(bob_id.clone())).await?;
            wait_for(&alice.handle, NegotiationState::Established).await?;
            wait_for(&bob.handle, NegotiationState::Established).await?;
            alice.handle.send_chat(bob_id.clone(), "hello").await?;
            alice.handle.end_call().await?;
            wait_for(&bob.handle, NegotiationState::Ended).await?;
        },
        Scenario::Glare => {
            let (a, b) = tokio::join!(
                alice.handle.start_call(Some(bob_id.clone())),
                bob.handle.start_call(Some(alice_id.clone())),
            );
            for result in [a, b] {
                match result {
                    Ok(()) => {},
                    // the other offer won the race to the relay; no glare this run
                    Err(e @ CallError::AlreadyInSession { .. }) => println!("  {e}"),
                    Err(e) => return Err(e.into()),
                }
            }
            wait_for(&alice.handle, NegotiationState::Established).await?;
            wait_for(&bob.handle, NegotiationState::Established).await?;
            for peer in [&alice.handle, &bob.handle] {
                if let Some(stats) = peer.snapshot().await?.session {
                    println!(
                        "  {} is {} after {} attempt(s)",
                        peer.local(),
                        stats.role,
                        stats.attempt + 1
                    );
                }
            }
            bob.handle.end_call().await?;
            wait_for(&alice.handle, NegotiationState::Ended).await?;
        },
        Scenario::Hangup => {
            alice.handle.start_call(Some(bob_id.clone())).await?;
            wait_for(&bob.handle, NegotiationState::Established).await?;
            bob.handle.end_call().await?;
            wait_for(&alice.handle, NegotiationState::Ended).await?;
            // second hangup is a no-op
            bob.handle.end_call().await?;
        },
        Scenario::RosterDrop => {
            alice.handle.start_call(Some(bob_id.clone())).await?;
            wait_for(&alice.handle, NegotiationState::Established).await?;
            bob.handle.leave().await?;
            wait_for(&alice.handle, NegotiationState::Ended).await?;
        },
        Scenario::Busy => {
            let carol = spawn_peer(&relay, "carol", config, latency).await?;
            wait_online(&carol.handle, &[&bob_id]).await?;
            alice.handle.start_call(Some(bob_id.clone())).await?;
            wait_for(&bob.handle, NegotiationState::Established).await?;
            carol.handle.start_call(Some(bob_id.clone())).await?;
            wait_for(&carol.handle, NegotiationState::Ended).await?;
            alice.handle.end_call().await?;
            shutdown(carol).await;
        },
        Scenario::EarlyCandidates | Scenario::All => {},
    }

    shutdown(alice).await;
    shutdown(bob).await;
    drop(relay);
    let _ = relay_task.await;
    Ok(())
}

async fn shutdown(peer: SimPeer) {
    let _ = peer.handle.leave().await;
    drop(peer.handle);
    let _ = peer.agent.await;
    let _ = peer.printer.await;
}

/// Candidates overtaking the offer, replayed through the pure engine.
fn early_candidates(config: &Config) -> anyhow::Result<()> {
    let alice = Participant::new("alice")?;
    let bob = Participant::new("bob")?;
    let mut manager = SessionLifecycleManager::new(bob.clone(), config.negotiation.tie_break);

    let inbound = [
        RelayMessage::candidate(&bob, &alice, IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host")),
        RelayMessage::candidate(&bob, &alice, IceCandidate::new("candidate:2 1 udp 1 10.0.0.2 5000 typ host")),
        RelayMessage::offer(&bob, &alice, SessionDescription::offer("v=0 alice")),
    ];
    for message in inbound {
        println!("  [bob] <- {}", message.to_json()?);
        manager.handle_relay_message(message)?;
        print_effects(&mut manager);
    }

    if let Some(ticket) = manager.current_ticket() {
        let answer = LocalDescription::new(SessionDescription::answer("v=0 bob"));
        manager.handle_completion(&ticket, Outcome::AnswerCreated(answer))?;
        print_effects(&mut manager);
    }
    println!("  [bob] final state: {}", manager.state());
    Ok(())
}

fn print_effects(manager: &mut SessionLifecycleManager) {
    for effect in manager.drain_effects() {
        match effect {
            Effect::Send(message) => println!("  [bob] -> {}", message.event_name()),
            Effect::Media { op, .. } => match op {
                MediaOp::ApplyCandidate(candidate) => {
                    println!("  [bob] apply {}", candidate.candidate);
                },
                other => println!("  [bob] media {}", other.name()),
            },
            Effect::StateChanged { from, to, .. } => println!("  [bob] {from} -> {to}"),
            Effect::Notify(notice) => println!("  [bob] {}", describe(&notice)),
            Effect::Roster(_) | Effect::Forward(_) => {},
        }
    }
}

fn cmd_inspect(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let message = RelayMessage::from_json(content.trim())?;

    println!("Relay Message:");
    println!("  Event:      {}", message.event_name());
    println!(
        "  Handling:   {}",
        if message.is_core() { "core" } else { "forwarded" }
    );
    if let Some(to) = message.recipient() {
        println!("  To:         {to}");
    }
    if let Some(from) = message.sender() {
        println!("  From:       {from}");
    }

    match &message {
        RelayMessage::Signal(envelope) => {
            println!("  Signal:     {}", envelope.signal.kind());
        },
        RelayMessage::OnlineUsers(users) => {
            println!("  Online:     {}", users.len());
        },
        RelayMessage::FileMessage(file) => {
            let bytes = file.decode()?;
            println!("  File:       {} ({} bytes)", file.file_name, bytes.len());
        },
        _ => {},
    }

    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    if let Some(path) = Config::default_path() {
        eprintln!("# default path: {}", path.display());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input {
        if s == "-" {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        } else {
            Ok(s)
        }
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
