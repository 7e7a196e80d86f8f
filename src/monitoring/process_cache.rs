use std::collections::HashMap;

use crate::procinfo::{ProcessProvider, ProcessRecord};
use crate::utils::hash;

const WEB_WORKER_EXE: &str = "w3wp.exe";
const APP_POOL_FLAG: &str = "-ap";
const UNKNOWN: &str = "unknown";

/// Identity facts for one process as persisted with every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMetadata {
    pub path: String,
    pub hash: String,
    pub parent: String,
    pub user_context: String,
}

/// Per-pid cache of expensive process facts.
///
/// Entries live for the lifetime of the agent; a pid reused by an unrelated
/// process returns stale data. Failed fetches are never cached, so the next
/// correlation for that pid pays the full lookup again.
#[derive(Default)]
pub struct ProcessCache {
    cache: HashMap<u32, ProcessMetadata>,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<P: ProcessProvider>(
        &mut self,
        pid: u32,
        provider: &mut P,
    ) -> Option<&ProcessMetadata> {
        if !self.cache.contains_key(&pid) {
            let metadata = match provider.process(pid) {
                Ok(record) => build_metadata(record),
                Err(e) => {
                    log::debug!("Metadata fetch for pid {} came up empty: {}", pid, e);
                    return None;
                }
            };
            self.cache.insert(pid, metadata);
        }
        self.cache.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn build_metadata(record: ProcessRecord) -> ProcessMetadata {
    let path = record.exe_path.to_string_lossy().into_owned();
    let hash = hash::sha256_file(&record.exe_path).unwrap_or_else(|_| UNKNOWN.to_string());
    let parent = record
        .parent_exe
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let mut user_context = record.username;
    if record.name.eq_ignore_ascii_case(WEB_WORKER_EXE) {
        if let Some(pool) = app_pool_argument(&record.cmdline) {
            user_context = format!("IIS: {}", pool);
        }
    }

    ProcessMetadata {
        path,
        hash,
        parent,
        user_context,
    }
}

/// First `-ap <value>` pair wins; a trailing flag with no value is ignored.
fn app_pool_argument(cmdline: &[String]) -> Option<&str> {
    let mut args = cmdline.iter();
    while let Some(arg) = args.next() {
        if arg == APP_POOL_FLAG {
            return args.next().map(String::as_str);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procinfo::{EnumerationError, ProcessQueryError, SocketRecord};
    use std::io::Write;
    use std::path::PathBuf;

    struct MetaProvider {
        result: Result<ProcessRecord, ProcessQueryError>,
        calls: usize,
    }

    impl MetaProvider {
        fn ok(record: ProcessRecord) -> Self {
            Self {
                result: Ok(record),
                calls: 0,
            }
        }

        fn err(error: ProcessQueryError) -> Self {
            Self {
                result: Err(error),
                calls: 0,
            }
        }
    }

    impl ProcessProvider for MetaProvider {
        fn connections(&mut self) -> Result<Vec<SocketRecord>, EnumerationError> {
            Ok(Vec::new())
        }

        fn process(&mut self, _pid: u32) -> Result<ProcessRecord, ProcessQueryError> {
            self.calls += 1;
            self.result.clone()
        }
    }

    fn record(name: &str, cmdline: &[&str]) -> ProcessRecord {
        ProcessRecord {
            exe_path: PathBuf::from("/nonexistent/bin/app"),
            name: name.to_string(),
            parent_exe: Some(PathBuf::from("/usr/bin/bash")),
            username: "alice".to_string(),
            cmdline: cmdline.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn second_get_is_served_from_cache() {
        let mut provider = MetaProvider::ok(record("app", &[]));
        let mut cache = ProcessCache::new();

        let first = cache.get(9999, &mut provider).unwrap().clone();
        let second = cache.get(9999, &mut provider).unwrap().clone();
        assert_eq!(provider.calls, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn failed_fetch_is_not_cached() {
        let mut provider = MetaProvider::err(ProcessQueryError::NotFound);
        let mut cache = ProcessCache::new();

        assert!(cache.get(9999, &mut provider).is_none());
        assert!(cache.get(9999, &mut provider).is_none());
        assert_eq!(provider.calls, 2);
        assert!(cache.is_empty());

        // The process came back readable: the retry succeeds and caches.
        provider.result = Ok(record("app", &[]));
        assert!(cache.get(9999, &mut provider).is_some());
        assert_eq!(provider.calls, 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zombie_and_access_denied_behave_as_absence() {
        for error in [ProcessQueryError::Zombie, ProcessQueryError::AccessDenied] {
            let mut provider = MetaProvider::err(error);
            let mut cache = ProcessCache::new();
            assert!(cache.get(1, &mut provider).is_none());
            assert!(cache.is_empty());
        }
    }

    #[test]
    fn iis_worker_gets_app_pool_context() {
        let mut provider =
            MetaProvider::ok(record("w3wp.exe", &["w3wp.exe", "-ap", "Pool1", "-v", "v4.0"]));
        let mut cache = ProcessCache::new();
        let metadata = cache.get(4242, &mut provider).unwrap();
        assert_eq!(metadata.user_context, "IIS: Pool1");
    }

    #[test]
    fn worker_name_match_is_case_insensitive() {
        let mut provider = MetaProvider::ok(record("W3WP.EXE", &["W3WP.EXE", "-ap", "Shop"]));
        let mut cache = ProcessCache::new();
        let metadata = cache.get(4243, &mut provider).unwrap();
        assert_eq!(metadata.user_context, "IIS: Shop");
    }

    #[test]
    fn trailing_flag_without_value_keeps_username() {
        let mut provider = MetaProvider::ok(record("w3wp.exe", &["w3wp.exe", "-ap"]));
        let mut cache = ProcessCache::new();
        let metadata = cache.get(4244, &mut provider).unwrap();
        assert_eq!(metadata.user_context, "alice");
    }

    #[test]
    fn non_worker_ignores_app_pool_flag() {
        let mut provider = MetaProvider::ok(record("nginx", &["nginx", "-ap", "Pool1"]));
        let mut cache = ProcessCache::new();
        let metadata = cache.get(4245, &mut provider).unwrap();
        assert_eq!(metadata.user_context, "alice");
    }

    #[test]
    fn unreadable_executable_hashes_as_unknown() {
        let mut provider = MetaProvider::ok(record("app", &[]));
        let mut cache = ProcessCache::new();
        let metadata = cache.get(1, &mut provider).unwrap();
        assert_eq!(metadata.hash, "unknown");
    }

    #[test]
    fn readable_executable_is_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("tool");
        let mut file = std::fs::File::create(&exe).unwrap();
        file.write_all(b"abc").unwrap();

        let mut rec = record("tool", &[]);
        rec.exe_path = exe;
        let mut provider = MetaProvider::ok(rec);
        let mut cache = ProcessCache::new();
        let metadata = cache.get(1, &mut provider).unwrap();
        assert_eq!(
            metadata.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn missing_parent_reads_unknown() {
        let mut rec = record("app", &[]);
        rec.parent_exe = None;
        let mut provider = MetaProvider::ok(rec);
        let mut cache = ProcessCache::new();
        let metadata = cache.get(1, &mut provider).unwrap();
        assert_eq!(metadata.parent, "unknown");
    }
}
