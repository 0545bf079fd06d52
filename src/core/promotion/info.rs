// src/core/promotion/info.rs

//! Parsing of the `INFO replication` text format: `key:value` lines, with
//! per-replica `slave<N>` entries whose value is a comma-separated `k=v`
//! record.

use std::collections::HashMap;

/// How many `slave<N>` slots are inspected when searching for the
/// promotion target.
const MAX_REPLICA_SLOTS: usize = 10;

#[derive(Debug, Default)]
pub struct ReplicationInfo {
    fields: HashMap<String, String>,
}

impl ReplicationInfo {
    /// Lines without a colon (section banners, blanks) are skipped.
    pub fn parse(text: &str) -> Self {
        let mut fields = HashMap::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once(':') {
                fields.insert(key.to_string(), value.to_string());
            }
        }
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// The byte offset the primary has emitted into its replication stream.
    pub fn master_repl_offset(&self) -> Option<i64> {
        self.fields.get("master_repl_offset")?.parse().ok()
    }

    /// Scans `slave0` through `slave9` for the entry whose ip and port
    /// match. Unparseable entries are skipped.
    pub fn find_replica(&self, host: &str, port: u16) -> Option<ReplicaEntry> {
        (0..MAX_REPLICA_SLOTS)
            .filter_map(|slot| self.fields.get(&format!("slave{slot}")))
            .filter_map(|raw| ReplicaEntry::parse(raw))
            .find(|entry| entry.host == host && entry.port == port)
    }
}

/// One replica as reported by the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaEntry {
    pub host: String,
    pub port: u16,
    pub offset: i64,
}

impl ReplicaEntry {
    /// Parses a record such as
    /// `ip=127.0.0.1,port=6380,state=online,offset=100,lag=0`. The ip,
    /// port, and offset fields are required.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut host = None;
        let mut port = None;
        let mut offset = None;
        for pair in raw.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "ip" => host = Some(value.to_string()),
                "port" => port = value.parse().ok(),
                "offset" => offset = value.parse().ok(),
                _ => {}
            }
        }
        Some(Self {
            host: host?,
            port: port?,
            offset: offset?,
        })
    }
}
