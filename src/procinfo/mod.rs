pub mod system;

use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Established,
    Other,
}

/// One entry of the host connection table, as enumerated by the backend.
#[derive(Debug, Clone)]
pub struct SocketRecord {
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub state: SocketState,
    pub pid: Option<u32>,
}

/// Identity facts for one live process.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub exe_path: PathBuf,
    pub name: String,
    pub parent_exe: Option<PathBuf>,
    pub username: String,
    pub cmdline: Vec<String>,
}

/// Why a process lookup produced nothing. None of these are failures to the
/// caller; they all surface as "unknown" placeholders downstream.
#[derive(Debug, Clone, Copy, Error)]
pub enum ProcessQueryError {
    #[error("no such process")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("zombie process")]
    Zombie,
}

#[derive(Debug, Error)]
#[error("connection enumeration failed: {0}")]
pub struct EnumerationError(pub String);

pub trait ProcessProvider {
    /// Full enumeration of the host's sockets with owning pids.
    fn connections(&mut self) -> Result<Vec<SocketRecord>, EnumerationError>;

    /// Identity facts for `pid`.
    fn process(&mut self, pid: u32) -> Result<ProcessRecord, ProcessQueryError>;
}
