use std::{path::PathBuf, process::ExitCode};

use chatty::{Config, RunFlags, Server};
use clap::Parser;
use signal_hook::{
    consts::{SIGINT, SIGQUIT, SIGTERM, SIGUSR1},
    flag as signal_flag,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Multi-user chat server over a local stream socket.
#[derive(Parser, Debug)]
#[command(name = "chatty", version)]
struct Args {
    /// Configuration file.
    #[arg(short = 'f', value_name = "FILE")]
    config: PathBuf,
}

fn install_signal_handlers(flags: &RunFlags) {
    for sig in [SIGINT, SIGQUIT, SIGTERM] {
        signal_flag::register_usize(sig, flags.stop_flag(), sig as usize)
            .unwrap_or_else(|err| panic!("cannot register signal {sig}: {err}"));
    }
    signal_flag::register(SIGUSR1, flags.dump_flag())
        .unwrap_or_else(|err| panic!("cannot register SIGUSR1: {err}"));

    // Dead peers must surface as write errors, not kill the process.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// A panic anywhere (worker threads included) flips the stop flag so the
/// dispatcher shuts the server down instead of serving with a dead pool.
fn install_panic_hook(flags: RunFlags) {
    let original = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        flags.request_stop();
        original(panic_info);
    }));
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let cfg = match Config::from_file(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(path = %args.config.display(), %err, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::bind(cfg) {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "cannot start server");
            return ExitCode::FAILURE;
        }
    };

    let flags = RunFlags::new();
    install_signal_handlers(&flags);
    install_panic_hook(flags.clone());

    info!(socket = %server.socket_path().display(), "starting");
    match server.run(&flags) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server terminated abnormally");
            ExitCode::FAILURE
        }
    }
}
