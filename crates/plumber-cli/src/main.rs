//! `plumber`: a minimal host binary that loads a declarative service
//! graph and runs the scheduler against a bound TCP listener (SPEC_FULL.md
//! §6 "CLI/daemon surface").

mod demo;
mod graph_config;
mod pidfile;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use plumber_core::config::{EnvSource, LayeredConfig, TomlFileSource};
use plumber_core::error::{PlumberError, Result};
use plumber_core::scheduler::{Scheduler, SchedulerConfig};
use plumber_core::servlet::ServletFactory;
use tracing_subscriber::EnvFilter;

use graph_config::GraphConfig;

#[derive(Parser)]
#[command(name = "plumber", version, about = "Run or stop a Plumber service graph")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a graph file, bind a listener, and run until killed.
    Run {
        /// Path to the `toml` service-graph description.
        #[arg(long)]
        graph: PathBuf,
        /// Listener address; overrides the graph file's `listen` key.
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Where to record this process's pid for a later `plumber stop`.
        #[arg(long)]
        pidfile: Option<PathBuf>,
    },
    /// Signal a running `plumber run` process to shut down.
    Stop {
        #[arg(long)]
        pidfile: Option<PathBuf>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn run(graph_path: PathBuf, listen_override: Option<SocketAddr>, pidfile_path: PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(&graph_path)
        .map_err(|e| PlumberError::usage(format!("reading graph file {}: {e}", graph_path.display())))?;
    let graph_config = GraphConfig::parse(&text)?;

    let mut factory = ServletFactory::new();
    demo::register(&mut factory);
    let graph = Arc::new(graph_config.build(&factory)?);

    let config = LayeredConfig::load(&[
        Box::new(TomlFileSource::new(&graph_path, 0)),
        Box::new(EnvSource::new("PLUMBER_", 10)),
    ])?;
    let scheduler_config = SchedulerConfig {
        worker_threads: config.get_parsed("worker_threads")?.unwrap_or(4),
        async_offload_threads: config.get_parsed("async_offload_threads")?.unwrap_or(2),
        equeue_capacity: config.get_parsed("equeue_capacity")?.unwrap_or(1024),
    };

    let addr = listen_override
        .or_else(|| graph_config.listen.as_deref().and_then(|s| s.parse().ok()))
        .ok_or_else(|| PlumberError::usage("no listen address: pass --listen or set `listen` in the graph file"))?;
    let (module, bound_addr) = plumber_transport_tcp::bind("pipe.tcp.main", addr)?;

    pidfile::write(&pidfile_path, std::process::id())?;
    tracing::info!(%bound_addr, pidfile = %pidfile_path.display(), "plumber listening");

    // A minimal host (SPEC_FULL.md's CLI/daemon-surface ambient note scopes
    // out daemonization beyond this): the process blocks here and relies on
    // the OS default disposition for `SIGTERM`/`SIGINT` to terminate it.
    // `Scheduler::kill`/pidfile removal never run in that path, same as any
    // process killed outright; `stop` exists to send that signal by pid
    // rather than to orchestrate a graceful drain.
    let _scheduler = Scheduler::start(graph, vec![module], scheduler_config);
    loop {
        std::thread::park();
    }
}

fn stop(pidfile_path: PathBuf) -> Result<()> {
    let pid = pidfile::read(&pidfile_path)?;
    pidfile::terminate(pid)?;
    pidfile::remove(&pidfile_path);
    tracing::info!(pid, "sent SIGTERM to running plumber process");
    Ok(())
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { graph, listen, pidfile } => run(graph, listen, pidfile.unwrap_or_else(pidfile::default_path)),
        Command::Stop { pidfile } => stop(pidfile.unwrap_or_else(pidfile::default_path)),
    };

    if let Err(e) = result {
        eprintln!("plumber: {e}");
        std::process::exit(1);
    }
}
