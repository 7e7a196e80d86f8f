use std::net::IpAddr;
use std::time::{Duration, Instant};

use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use pcap::{Active, Capture, Device};

use super::{CaptureError, PacketCapture, PacketRecord, Protocol, dns};

const DNS_PORT: u16 = 53;
const READ_TIMEOUT_MS: i32 = 250;
const SNAPLEN: i32 = 65535;

/// Live capture over a libpcap device. The handle is opened lazily on the
/// first window so a missing driver surfaces as a window-level
/// `BackendUnavailable` and receives the fatal classification in the loop.
pub struct LiveCapture {
    device: Option<String>,
    handle: Option<Capture<Active>>,
}

impl LiveCapture {
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            handle: None,
        }
    }

    fn open(&mut self) -> Result<&mut Capture<Active>, CaptureError> {
        if self.handle.is_none() {
            let device = match &self.device {
                Some(name) => Device::from(name.as_str()),
                None => Device::lookup()
                    .map_err(|e| CaptureError::BackendUnavailable(e.to_string()))?
                    .ok_or_else(|| {
                        CaptureError::BackendUnavailable("no capture device found".to_string())
                    })?,
            };
            log::info!("Opening capture device {}", device.name);
            let capture = Capture::from_device(device)
                .map_err(|e| CaptureError::BackendUnavailable(e.to_string()))?
                .promisc(true)
                .snaplen(SNAPLEN)
                .timeout(READ_TIMEOUT_MS)
                .open()
                .map_err(|e| CaptureError::BackendUnavailable(e.to_string()))?;
            self.handle = Some(capture);
        }
        Ok(self.handle.as_mut().expect("handle set above"))
    }
}

impl PacketCapture for LiveCapture {
    fn run_window(
        &mut self,
        window: Duration,
        on_packet: &mut dyn FnMut(PacketRecord),
    ) -> Result<(), CaptureError> {
        let capture = self.open()?;
        let deadline = Instant::now() + window;

        while Instant::now() < deadline {
            match capture.next_packet() {
                Ok(packet) => {
                    if let Some(record) = parse_packet(packet.header.len as u64, packet.data) {
                        on_packet(record);
                    }
                }
                // The read timeout bounds how long a quiet link can hold us.
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => return Err(CaptureError::Window(e.to_string())),
            }
        }
        Ok(())
    }
}

/// Slice an ethernet frame into a `PacketRecord`. Non-IP frames yield `None`.
fn parse_packet(length: u64, data: &[u8]) -> Option<PacketRecord> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (source_addr, dest_addr) = match &sliced.ip {
        Some(InternetSlice::Ipv4(header, _)) => (
            IpAddr::V4(header.source_addr()),
            IpAddr::V4(header.destination_addr()),
        ),
        Some(InternetSlice::Ipv6(header, _)) => (
            IpAddr::V6(header.source_addr()),
            IpAddr::V6(header.destination_addr()),
        ),
        None => return None,
    };

    let (protocol, source_port, dest_port) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (Protocol::Tcp, tcp.source_port(), tcp.destination_port()),
        Some(TransportSlice::Udp(udp)) => (Protocol::Udp, udp.source_port(), udp.destination_port()),
        _ => (Protocol::Other, 0, 0),
    };

    let dns_query = if protocol == Protocol::Udp && (source_port == DNS_PORT || dest_port == DNS_PORT)
    {
        dns::question_name(sliced.payload)
    } else {
        None
    };

    Some(PacketRecord {
        source_addr,
        dest_addr,
        protocol,
        source_port,
        dest_port,
        length,
        dns_query,
    })
}
