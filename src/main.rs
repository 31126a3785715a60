use bmcsim::config::DEFAULT_CONFIG_PATH;
use bmcsim::engine::{CommandStatus, DiagnosticEngine, SharedEngine};
use bmcsim::{Reactor, SimConfig, SimOptions, Simulator};

use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bmcsim")]
#[command(about = "Baseboard management controller simulator")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a console command at startup
    #[arg(short = 'x', long = "command-string")]
    command_string: Option<String>,

    /// Run each line of a file as a console command at startup
    #[arg(short = 'f', long = "command-file")]
    command_file: Option<PathBuf>,

    /// More logging (-d, -dd for raw message bytes)
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Do not use standard input and output as a console
    #[arg(short, long)]
    nostdio: bool,
}

fn init_logging(verbosity: u8) {
    let base_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match SimConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            init_logging(cli.debug);
            error!(%err, "unable to load configuration");
            return ExitCode::FAILURE;
        }
    };
    init_logging(cli.debug.max(config.debug));

    let mut reactor = match Reactor::new() {
        Ok(reactor) => reactor,
        Err(err) => {
            error!(%err, "unable to create the reactor");
            return ExitCode::FAILURE;
        }
    };

    let engine: SharedEngine = Rc::new(RefCell::new(DiagnosticEngine::new()));
    let options = SimOptions {
        nostdio: cli.nostdio,
    };
    let mut sim = match Simulator::start(&mut reactor, &config, engine.clone(), options) {
        Ok(sim) => sim,
        Err(err) => {
            error!(%err, "simulator startup failed");
            return ExitCode::FAILURE;
        }
    };

    let mut status = CommandStatus::Continue;
    if let Some(command) = &cli.command_string {
        status = sim.run_command(command);
    }
    if status == CommandStatus::Continue
        && let Some(path) = &cli.command_file
    {
        status = match sim.run_command_file(path) {
            Ok(status) => status,
            Err(err) => {
                error!(%err, "unable to run command file");
                CommandStatus::Continue
            }
        };
    }

    let result = if status == CommandStatus::Shutdown {
        engine.borrow_mut().shutdown();
        Ok(())
    } else {
        reactor.run_forever()
    };

    sim.teardown(&mut reactor);

    match result {
        Ok(()) => {
            info!("simulator stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "reactor failed");
            ExitCode::FAILURE
        }
    }
}
