use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use rsmanager::{init_runtime, init_tracing, Error, Result};
use rsmanager::admin::MongoShell;
use rsmanager::config::load_config;
use rsmanager::controller::Controller;


#[derive(Parser, Debug)]
#[command(name = "rsmanager", about = "Manage a MongoDB replica set for failover testing")]
struct Args {
    /// Config file to use instead of searching for rsmanager.yaml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug-level logging
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch members, initiate the replica set and wait for it to be healthy
    Start {
        /// Number of members
        #[arg(short = 'n')]
        n: Option<u32>,
        /// Make the last member an arbiter
        #[arg(long)]
        arbiter: bool,
        /// Keep existing data and log directories
        #[arg(long)]
        keep_data: bool,
    },
    /// Kill every member
    Stop,
    /// Print each member's name and state
    Status,
    /// Kill the primary
    KillPrimary,
    /// Kill one secondary, chosen at random
    KillSecondary,
    /// Kill every secondary
    KillSecondaries,
    /// Kill the given members
    Kill {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Restart killed members
    Restart {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// Ask the primary to step down
    Stepdown,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(if args.verbose { Level::DEBUG } else { Level::INFO });

    let runtime = match init_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(%e, "could not create runtime");
            return ExitCode::FAILURE;
        },
    };
    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%e, "failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<()> {
    let conf = load_config(args.config.as_deref())?;

    // ^C cancels whatever we're waiting on, start then cleans up after itself
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted");
            on_interrupt.cancel();
        }
    });

    let admin = MongoShell::new(&conf);
    let mut controller = Controller::new(conf, admin, cancel);
    match args.command {
        Command::Start { n, arbiter, keep_data } => {
            let n = n.ok_or_else(|| Error::new("must specify -n with command start"))?;
            let started = controller.start(n, arbiter, !keep_data).await?;
            println!("{} {}", started.primary, started.set_name);
        },
        Command::Stop => report("killed", controller.stop().await?),
        Command::Status => {
            for member in controller.status().await? {
                println!("{} {} {}", member.name, member.state, member.state_str);
            }
        },
        Command::KillPrimary => report("killed", controller.kill_primary().await?),
        Command::KillSecondary => report("killed", controller.kill_random_secondary().await?),
        Command::KillSecondaries => report("killed", controller.kill_all_secondaries().await?),
        Command::Kill { addresses } => report("killed", controller.kill(&addresses).await?),
        Command::Restart { addresses } => {
            let restarted = controller.restart(&addresses).await?;
            if restarted.len() < addresses.len() {
                warn!(requested = addresses.len(), restarted = restarted.len(), "not every member restarted");
            }
            report("restarted", restarted)
        },
        Command::Stepdown => report("stepped down", controller.stepdown().await?),
    }
    Ok(())
}

fn report(action: &str, addresses: Vec<String>) {
    info!(count = addresses.len(), "{}", action);
    for address in addresses {
        println!("{}", address);
    }
}
