//! Uses clap to define the CLI interface declaratively.
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration; built-in defaults are used when the file is absent
    #[arg(short, default_value = "pollsock.toml", long, value_name = "FILE")]
    pub config: PathBuf,

    /// listen on this port instead of the configured one
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,
}
