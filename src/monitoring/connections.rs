use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::procinfo::{ProcessProvider, SocketState};

/// One half of an established connection as seen from the local host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

/// TTL-gated snapshot of the host connection table, mapping each established
/// connection to its owning pid.
///
/// A rebuild replaces the mapping wholesale; between rebuilds the previous
/// snapshot stays authoritative however stale it is. The TTL is the only
/// thing bounding enumeration cost under high packet volume.
pub struct ConnectionTable {
    map: HashMap<ConnectionKey, u32>,
    ttl: Duration,
    last_refresh: Option<Instant>,
}

impl ConnectionTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            ttl,
            last_refresh: None,
        }
    }

    /// Rebuild from a full enumeration unless the previous rebuild is still
    /// within the TTL. On enumeration failure the old snapshot is kept and
    /// `last_refresh` is not advanced, so the next call retries immediately
    /// instead of waiting out a full TTL.
    pub fn refresh<P: ProcessProvider>(&mut self, now: Instant, provider: &mut P) {
        if let Some(last) = self.last_refresh {
            if now.saturating_duration_since(last) < self.ttl {
                return;
            }
        }

        match provider.connections() {
            Ok(records) => {
                let mut map = HashMap::with_capacity(records.len());
                for record in records {
                    if record.state != SocketState::Established
                        || record.remote_addr.is_unspecified()
                    {
                        continue;
                    }
                    let Some(pid) = record.pid else { continue };
                    map.insert(
                        ConnectionKey {
                            local_port: record.local_port,
                            remote_addr: record.remote_addr,
                            remote_port: record.remote_port,
                        },
                        pid,
                    );
                }
                log::debug!("Connection table rebuilt: {} established entries", map.len());
                self.map = map;
                self.last_refresh = Some(now);
            }
            Err(e) => {
                log::error!("Connection table refresh failed: {}", e);
            }
        }
    }

    pub fn lookup(&self, local_port: u16, remote_addr: IpAddr, remote_port: u16) -> Option<u32> {
        self.map
            .get(&ConnectionKey {
                local_port,
                remote_addr,
                remote_port,
            })
            .copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
