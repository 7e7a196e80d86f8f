use std::collections::HashMap;
use std::net::IpAddr;

use shared::models::NetworkEvent;

use crate::capture::PacketRecord;
use crate::monitoring::connections::ConnectionTable;
use crate::monitoring::process_cache::ProcessCache;
use crate::procinfo::ProcessProvider;

const UNKNOWN: &str = "unknown";

/// Resolves observed packets to their owning process and assembles the
/// persisted event. Holds the DNS observation cache (destination address →
/// last seen query domain, last-write-wins, never expires) and the local
/// address used for sent/received attribution.
pub struct Correlator {
    dns_cache: HashMap<IpAddr, String>,
    local_addr: Option<IpAddr>,
}

impl Correlator {
    pub fn new(local_addr: Option<IpAddr>) -> Self {
        Self {
            dns_cache: HashMap::new(),
            local_addr,
        }
    }

    pub fn correlate<P: ProcessProvider>(
        &mut self,
        packet: &PacketRecord,
        table: &ConnectionTable,
        cache: &mut ProcessCache,
        provider: &mut P,
    ) -> NetworkEvent {
        let dns_query = match &packet.dns_query {
            Some(name) => {
                let domain = name.trim_end_matches('.').to_string();
                self.dns_cache.insert(packet.dest_addr, domain.clone());
                domain
            }
            None => String::new(),
        };

        // A captured packet does not say which endpoint is local, but the
        // connection table was built from the local host's own view, so one
        // of the two orientations matches if we own the flow. First match
        // wins; there is nothing to break a tie with.
        let pid = table
            .lookup(packet.source_port, packet.dest_addr, packet.dest_port)
            .or_else(|| table.lookup(packet.dest_port, packet.source_addr, packet.source_port));

        let (process_path, process_hash, parent_process, user_context) =
            match pid.and_then(|pid| cache.get(pid, provider)) {
                Some(metadata) => (
                    metadata.path.clone(),
                    metadata.hash.clone(),
                    metadata.parent.clone(),
                    metadata.user_context.clone(),
                ),
                None => (
                    UNKNOWN.to_string(),
                    UNKNOWN.to_string(),
                    UNKNOWN.to_string(),
                    UNKNOWN.to_string(),
                ),
            };

        // Direction attribution against the once-resolved local address;
        // multi-homed hosts can misattribute here.
        let bytes_sent = if self.local_addr == Some(packet.source_addr) {
            packet.length
        } else {
            0
        };
        let bytes_recv = if self.local_addr == Some(packet.dest_addr) {
            packet.length
        } else {
            0
        };

        NetworkEvent {
            timestamp: now_timestamp(),
            process_path,
            process_hash,
            source_ip: packet.source_addr.to_string(),
            dest_ip: packet.dest_addr.to_string(),
            dest_domain: self
                .dns_cache
                .get(&packet.dest_addr)
                .cloned()
                .unwrap_or_default(),
            dest_port: packet.dest_port,
            bytes_sent,
            bytes_recv,
            protocol: packet.protocol.to_string(),
            dns_query,
            parent_process,
            user_context,
        }
    }
}

fn now_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Protocol;
    use crate::procinfo::{
        EnumerationError, ProcessQueryError, ProcessRecord, SocketRecord, SocketState,
    };
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    struct FixtureProvider {
        sockets: Vec<SocketRecord>,
        process_calls: usize,
    }

    impl ProcessProvider for FixtureProvider {
        fn connections(&mut self) -> Result<Vec<SocketRecord>, EnumerationError> {
            Ok(self.sockets.clone())
        }

        fn process(&mut self, pid: u32) -> Result<ProcessRecord, ProcessQueryError> {
            self.process_calls += 1;
            if pid == 9999 {
                Ok(ProcessRecord {
                    exe_path: PathBuf::from("/nonexistent/usr/bin/curl"),
                    name: "curl".to_string(),
                    parent_exe: Some(PathBuf::from("/usr/bin/bash")),
                    username: "alice".to_string(),
                    cmdline: vec!["curl".to_string()],
                })
            } else {
                Err(ProcessQueryError::NotFound)
            }
        }
    }

    fn fixture() -> (FixtureProvider, ConnectionTable) {
        let mut provider = FixtureProvider {
            sockets: vec![SocketRecord {
                local_port: 1234,
                remote_addr: "8.8.8.8".parse().unwrap(),
                remote_port: 443,
                state: SocketState::Established,
                pid: Some(9999),
            }],
            process_calls: 0,
        };
        let mut table = ConnectionTable::new(Duration::from_secs(2));
        table.refresh(Instant::now(), &mut provider);
        (provider, table)
    }

    fn tcp_packet(src: &str, src_port: u16, dst: &str, dst_port: u16) -> PacketRecord {
        PacketRecord {
            source_addr: src.parse().unwrap(),
            dest_addr: dst.parse().unwrap(),
            protocol: Protocol::Tcp,
            source_port: src_port,
            dest_port: dst_port,
            length: 100,
            dns_query: None,
        }
    }

    #[test]
    fn outbound_orientation_resolves_the_owner() {
        let (mut provider, table) = fixture();
        let mut cache = ProcessCache::new();
        let mut correlator = Correlator::new(None);

        let packet = tcp_packet("192.168.1.5", 1234, "8.8.8.8", 443);
        let event = correlator.correlate(&packet, &table, &mut cache, &mut provider);
        assert_eq!(event.process_path, "/nonexistent/usr/bin/curl");
        assert_eq!(event.user_context, "alice");
        assert_eq!(event.protocol, "TCP");
    }

    #[test]
    fn inbound_orientation_resolves_via_second_pass() {
        let (mut provider, table) = fixture();
        let mut cache = ProcessCache::new();
        let mut correlator = Correlator::new(None);

        let packet = tcp_packet("8.8.8.8", 443, "192.168.1.5", 1234);
        let event = correlator.correlate(&packet, &table, &mut cache, &mut provider);
        assert_eq!(event.process_path, "/nonexistent/usr/bin/curl");
        assert_eq!(event.parent_process, "/usr/bin/bash");
    }

    #[test]
    fn unmatched_flow_yields_unknown_fields_and_never_fails() {
        let (mut provider, table) = fixture();
        let mut cache = ProcessCache::new();
        let mut correlator = Correlator::new(None);

        let packet = tcp_packet("172.16.0.9", 50001, "203.0.113.7", 22);
        let event = correlator.correlate(&packet, &table, &mut cache, &mut provider);
        assert_eq!(event.process_path, "unknown");
        assert_eq!(event.process_hash, "unknown");
        assert_eq!(event.parent_process, "unknown");
        assert_eq!(event.user_context, "unknown");
        assert_eq!(event.dest_domain, "");
        assert_eq!(provider.process_calls, 0);
    }

    #[test]
    fn dns_cache_is_last_write_wins() {
        let (mut provider, table) = fixture();
        let mut cache = ProcessCache::new();
        let mut correlator = Correlator::new(None);

        let mut packet = tcp_packet("192.168.1.5", 50000, "10.0.0.9", 53);
        packet.protocol = Protocol::Udp;
        packet.dns_query = Some("a.example.com.".to_string());
        let event = correlator.correlate(&packet, &table, &mut cache, &mut provider);
        assert_eq!(event.dns_query, "a.example.com");
        assert_eq!(event.dest_domain, "a.example.com");

        packet.dns_query = Some("b.example.com".to_string());
        let event = correlator.correlate(&packet, &table, &mut cache, &mut provider);
        assert_eq!(event.dest_domain, "b.example.com");

        // A later plain packet to the same destination sees the last domain.
        packet.dns_query = None;
        let event = correlator.correlate(&packet, &table, &mut cache, &mut provider);
        assert_eq!(event.dns_query, "");
        assert_eq!(event.dest_domain, "b.example.com");
    }

    #[test]
    fn byte_attribution_follows_local_address() {
        let (mut provider, table) = fixture();
        let mut cache = ProcessCache::new();
        let local: IpAddr = "192.168.1.5".parse().unwrap();
        let mut correlator = Correlator::new(Some(local));

        let outbound = tcp_packet("192.168.1.5", 1234, "8.8.8.8", 443);
        let event = correlator.correlate(&outbound, &table, &mut cache, &mut provider);
        assert_eq!(event.bytes_sent, 100);
        assert_eq!(event.bytes_recv, 0);

        let inbound = tcp_packet("8.8.8.8", 443, "192.168.1.5", 1234);
        let event = correlator.correlate(&inbound, &table, &mut cache, &mut provider);
        assert_eq!(event.bytes_sent, 0);
        assert_eq!(event.bytes_recv, 100);

        let transit = tcp_packet("10.1.1.1", 1, "10.2.2.2", 2);
        let event = correlator.correlate(&transit, &table, &mut cache, &mut provider);
        assert_eq!(event.bytes_sent, 0);
        assert_eq!(event.bytes_recv, 0);
    }

    #[test]
    fn unresolved_local_address_attributes_nothing() {
        let (mut provider, table) = fixture();
        let mut cache = ProcessCache::new();
        let mut correlator = Correlator::new(None);

        let packet = tcp_packet("192.168.1.5", 1234, "8.8.8.8", 443);
        let event = correlator.correlate(&packet, &table, &mut cache, &mut provider);
        assert_eq!(event.bytes_sent, 0);
        assert_eq!(event.bytes_recv, 0);
    }
}
