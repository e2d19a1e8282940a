use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dtl_backend::BackendRegistry;
use dtl_core::Options;
use dtl_server::Server;
use log::{error, info};

/// Distributed Transaction Log server (spec.md §6 "CLI surface").
#[derive(Parser, Debug)]
#[command(name = "dtl-serverd")]
struct Args {
    /// Root directory for the file backend; omit for a memory-only backend.
    #[arg(long)]
    path: Option<PathBuf>,

    /// Address to bind; defaults to all interfaces.
    #[arg(long, default_value = "::")]
    address: String,

    /// Port to listen on.
    #[arg(long, default_value_t = Options::default().default_port)]
    port: u16,

    /// Accepted for forward-compatibility with future transports; only "tcp"
    /// is implemented.
    #[arg(long, default_value = "tcp")]
    transport: String,

    /// Best-effort background-fork flag; a no-op on platforms without fork().
    #[arg(long)]
    daemonize: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.transport != "tcp" {
        error!("unsupported transport {:?}; only tcp is implemented", args.transport);
        return ExitCode::FAILURE;
    }
    if args.daemonize {
        info!("--daemonize requested; running in the foreground (no fork() on this platform build)");
    }

    let registry = match &args.path {
        Some(path) => match BackendRegistry::file(path) {
            Ok(r) => Arc::new(r),
            Err(e) => {
                error!("failed to start file-backed registry at {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Arc::new(BackendRegistry::memory()),
    };

    let options = Options::default();
    let server = match Server::new(&args.address, args.port, options.listen_backlog, registry) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    let stop = server.stop_handle();
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&stop)) {
            error!("failed to install signal handler for signal {sig}: {e}");
            return ExitCode::FAILURE;
        }
    }

    server.run();
    info!("dtl-serverd: clean shutdown");
    ExitCode::SUCCESS
}
