use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Column order of the persisted event log. Writers and readers must agree
/// on this order; a new store starts with exactly this header row.
pub const CSV_HEADER: [&str; 13] = [
    "timestamp",
    "process_path",
    "process_hash",
    "source_ip",
    "dest_ip",
    "dest_domain",
    "dest_port",
    "bytes_sent",
    "bytes_recv",
    "protocol",
    "dns_query",
    "parent_process",
    "user_context",
];

/// One correlated flow observation. Immutable once built; owned by the
/// event buffer until flushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub timestamp: String,
    pub process_path: String,
    pub process_hash: String,
    pub source_ip: String,
    pub dest_ip: String,
    pub dest_domain: String,
    pub dest_port: u16,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub protocol: String,
    pub dns_query: String,
    pub parent_process: String,
    pub user_context: String,
}

impl NetworkEvent {
    /// Encode as one CSV row in `CSV_HEADER` order.
    pub fn csv_row(&self) -> String {
        [
            escape_field(&self.timestamp),
            escape_field(&self.process_path),
            escape_field(&self.process_hash),
            escape_field(&self.source_ip),
            escape_field(&self.dest_ip),
            escape_field(&self.dest_domain),
            self.dest_port.to_string(),
            self.bytes_sent.to_string(),
            self.bytes_recv.to_string(),
            escape_field(&self.protocol),
            escape_field(&self.dns_query),
            escape_field(&self.parent_process),
            escape_field(&self.user_context),
        ]
        .join(",")
    }

    /// Parse one CSV line using a header map built with [`header_map`].
    pub fn from_csv_line(line: &str, headers: &HashMap<String, usize>) -> Option<Self> {
        let fields = split_csv_line(line);
        if fields.len() < CSV_HEADER.len() {
            return None;
        }

        let get_field = |name: &str| -> Option<&str> {
            headers.get(name).and_then(|&idx| fields.get(idx)).map(String::as_str)
        };

        Some(Self {
            timestamp: get_field("timestamp")?.to_string(),
            process_path: get_field("process_path")?.to_string(),
            process_hash: get_field("process_hash")?.to_string(),
            source_ip: get_field("source_ip")?.to_string(),
            dest_ip: get_field("dest_ip")?.to_string(),
            dest_domain: get_field("dest_domain")?.to_string(),
            dest_port: get_field("dest_port").and_then(|s| s.parse().ok()).unwrap_or(0),
            bytes_sent: get_field("bytes_sent").and_then(|s| s.parse().ok()).unwrap_or(0),
            bytes_recv: get_field("bytes_recv").and_then(|s| s.parse().ok()).unwrap_or(0),
            protocol: get_field("protocol")?.to_string(),
            dns_query: get_field("dns_query")?.to_string(),
            parent_process: get_field("parent_process")?.to_string(),
            user_context: get_field("user_context")?.to_string(),
        })
    }
}

/// Map column names to their position from a header line.
pub fn header_map(header_line: &str) -> HashMap<String, usize> {
    header_line
        .split(',')
        .enumerate()
        .map(|(idx, name)| (name.trim().to_string(), idx))
        .collect()
}

/// Split one CSV line, honoring double-quoted fields with `""` escapes.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn escape_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NetworkEvent {
        NetworkEvent {
            timestamp: "2024-03-01T10:00:00.000000".to_string(),
            process_path: "/usr/bin/curl".to_string(),
            process_hash: "abc123".to_string(),
            source_ip: "192.168.1.5".to_string(),
            dest_ip: "8.8.8.8".to_string(),
            dest_domain: "dns.google".to_string(),
            dest_port: 443,
            bytes_sent: 120,
            bytes_recv: 0,
            protocol: "TCP".to_string(),
            dns_query: String::new(),
            parent_process: "/usr/bin/bash".to_string(),
            user_context: "alice".to_string(),
        }
    }

    #[test]
    fn row_round_trips_through_header_map() {
        let headers = header_map(&CSV_HEADER.join(","));
        let event = sample();
        let parsed = NetworkEvent::from_csv_line(&event.csv_row(), &headers).unwrap();
        assert_eq!(parsed.process_path, event.process_path);
        assert_eq!(parsed.dest_port, 443);
        assert_eq!(parsed.bytes_sent, 120);
        assert_eq!(parsed.user_context, "alice");
    }

    #[test]
    fn quoted_fields_round_trip() {
        let headers = header_map(&CSV_HEADER.join(","));
        let mut event = sample();
        event.user_context = "IIS: Pool, With Comma".to_string();
        event.process_path = "C:\\Program Files\\\"odd\"\\app.exe".to_string();
        let parsed = NetworkEvent::from_csv_line(&event.csv_row(), &headers).unwrap();
        assert_eq!(parsed.user_context, "IIS: Pool, With Comma");
        assert_eq!(parsed.process_path, "C:\\Program Files\\\"odd\"\\app.exe");
    }

    #[test]
    fn short_line_is_rejected() {
        let headers = header_map(&CSV_HEADER.join(","));
        assert!(NetworkEvent::from_csv_line("a,b,c", &headers).is_none());
    }

    #[test]
    fn split_handles_empty_fields() {
        assert_eq!(split_csv_line("a,,c"), vec!["a", "", "c"]);
    }
}
