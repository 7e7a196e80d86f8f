pub mod dns;
pub mod live;

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Other,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Other => write!(f, "OTHER"),
        }
    }
}

/// One observed packet, as delivered by the capture backend. Ports are zero
/// when the transport layer is neither TCP nor UDP; `dns_query` is set only
/// for UDP packets carrying a DNS question.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub source_addr: IpAddr,
    pub dest_addr: IpAddr,
    pub protocol: Protocol,
    pub source_port: u16,
    pub dest_port: u16,
    pub length: u64,
    pub dns_query: Option<String>,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture driver or device is missing or cannot be opened. This
    /// condition cannot self-heal and terminates the agent.
    #[error("capture backend unavailable: {0}")]
    BackendUnavailable(String),
    /// A failure inside one capture window; the loop backs off and retries.
    #[error("capture window failed: {0}")]
    Window(String),
}

pub trait PacketCapture {
    /// Observe traffic for up to `window`, invoking `on_packet` synchronously
    /// once per observed packet. Returns when the window elapses.
    fn run_window(
        &mut self,
        window: Duration,
        on_packet: &mut dyn FnMut(PacketRecord),
    ) -> Result<(), CaptureError>;
}
