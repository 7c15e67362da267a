//! The Serializable configuration data structures used for setup.
use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pollsock::{Family, BUF_SIZE, DEFAULT_CAPACITY};

#[derive(Error, Debug)]
pub enum ConfError {
    #[error("failed to read config: {0}")]
    Read(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FamilyConf {
    Inet,
    Inet6,
    Unix,
}

impl From<FamilyConf> for Family {
    fn from(conf: FamilyConf) -> Self {
        match conf {
            FamilyConf::Inet => Family::Inet,
            FamilyConf::Inet6 => Family::Inet6,
            FamilyConf::Unix => Family::Unix,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Address to bind, or the socket path for the unix family.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_family")]
    pub family: FamilyConf,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: i32,

    #[serde(default = "default_read_bufsize")]
    pub read_bufsize: usize,

    #[serde(default = "default_poller_capacity")]
    pub poller_capacity: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            family: default_family(),
            poll_timeout_ms: default_poll_timeout_ms(),
            read_bufsize: default_read_bufsize(),
            poller_capacity: default_poller_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_family() -> FamilyConf {
    FamilyConf::Inet
}

fn default_poll_timeout_ms() -> i32 {
    1000
}

fn default_read_bufsize() -> usize {
    BUF_SIZE
}

fn default_poller_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}
