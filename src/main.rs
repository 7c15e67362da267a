mod cli;
mod conf;
mod logging;
mod server;

use std::thread;

use clap::Parser;
use nix::sys::signal::{SigSet, Signal};
use pollsock::Poller;
use tracing::{error, info};

use crate::cli::Cli;
use crate::conf::Config;
use crate::server::{Server, ServerError};

fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    logging::init(&config.log_level);
    info!(?config, "starting");

    // Blocked here so every thread inherits the mask and the signals are
    // only ever consumed by the watcher below, as a plain notification.
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block()?;

    let poller = Poller::with_capacity(config.poller_capacity)?;
    let server = Server::bind(&config, poller)?;

    let wakeup = server.wakeup();
    thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || match mask.wait() {
            Ok(sig) => {
                info!(signal = %sig, "received signal");
                if let Err(e) = wakeup.write(&[1]) {
                    error!(error = %e, detail = %wakeup.error(), "failed to wake reactor");
                }
            }
            Err(e) => error!(error = %e, "sigwait failed"),
        })?;

    server.run()
}
