//! Operator CLI for system-test clusters.
//!
//! `systestctl` deploys a cluster into a namespace, injects and heals faults
//! by hand, and tears namespaces down.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use systest::chaos::FaultKind;
use systest::context::TestContext;
use systest::ctl::{self, GlobalOptions, UpOptions};
use systest::platform::{KubeBackend, Platform};
use systest::settings::HarnessConfig;

#[derive(Parser, Debug)]
#[command(name = "systestctl")]
#[command(about = "Manage ephemeral ledger test clusters")]
#[command(version)]
struct Args {
    /// Path to a TOML config file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Namespace to act on
    #[arg(long, short = 'n', env = "SYSTEST_NAMESPACE", global = true, default_value = "")]
    namespace: String,

    /// Output in JSON format instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy a cluster and print its members
    Up {
        /// Number of bootstrap peers
        #[arg(long, default_value = "2")]
        bootnodes: usize,
        /// Number of workload peers
        #[arg(long, default_value = "8")]
        workload: usize,
        /// Target outbound connections per peer
        #[arg(long)]
        target_outbound: Option<usize>,
        /// Skip the poet service
        #[arg(long)]
        no_poet: bool,
    },
    /// Delete a namespace
    Down,
    /// Partition two comma separated sets of pods
    Partition {
        name: String,
        #[arg(long)]
        a: String,
        #[arg(long)]
        b: String,
    },
    /// Fail a comma separated set of pods
    Fail {
        name: String,
        #[arg(long)]
        targets: String,
    },
    /// Remove a fault
    Heal {
        #[arg(value_enum)]
        kind: Kind,
        name: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Partition,
    Failure,
}

impl From<Kind> for FaultKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Partition => FaultKind::Partition,
            Kind::Failure => FaultKind::Failure,
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut cfg = HarnessConfig::load(args.config.as_deref())?;
    if !args.namespace.is_empty() {
        cfg.namespace = args.namespace.clone();
    }
    systest::trace::init(cfg.log_format, &cfg.log_level)?;
    let mut stdout = io::stdout();

    if let Command::Up {
        bootnodes,
        workload,
        target_outbound,
        no_poet,
    } = &args.command
    {
        // The namespace outlives this process.
        cfg.install_signal_handler = false;
        let ctx = TestContext::connect(cfg).await?;
        let opts = UpOptions {
            bootnodes: *bootnodes,
            workload: *workload,
            target_outbound: *target_outbound,
            with_poet: !no_poet,
        };
        return ctl::up(&ctx, &opts, args.json, &mut stdout).await;
    }

    anyhow::ensure!(!cfg.namespace.is_empty(), "--namespace is required");
    let opts = GlobalOptions {
        namespace: cfg.namespace.clone(),
        json: args.json,
    };
    let platform: Arc<dyn Platform> = Arc::new(KubeBackend::try_default().await?);
    match &args.command {
        Command::Up { .. } => Ok(()),
        Command::Down => ctl::down(&platform, &opts, &mut stdout).await,
        Command::Partition { name, a, b } => {
            ctl::partition(
                &platform,
                &opts,
                &mut stdout,
                name,
                &ctl::parse_names(a),
                &ctl::parse_names(b),
            )
            .await
        }
        Command::Fail { name, targets } => {
            ctl::fail(&platform, &opts, &mut stdout, name, &ctl::parse_names(targets)).await
        }
        Command::Heal { kind, name } => {
            ctl::heal(&platform, &opts, &mut stdout, (*kind).into(), name).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
