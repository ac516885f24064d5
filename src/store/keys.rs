use crate::error::{CronbeatError, Result};

/// Deterministic key derivation for everything the node reads or writes.
///
/// Layout under the configured namespace root:
///
/// | purpose                  | key shape                          |
/// |--------------------------|------------------------------------|
/// | job assignment           | `<ns>/job/<nodeUUID>/<jobID>`      |
/// | job profile prefix       | `<ns>/job/<nodeUUID>/`             |
/// | run heartbeat            | `<ns>/proc/<nodeUUID>/<jobID>/<runID>` |
/// | node run prefix          | `<ns>/proc/<nodeUUID>/`            |
/// | one-off task marker      | `<ns>/once/<jobID>`                |
/// | system switch per node   | `<ns>/system/switch/<nodeUUID>`    |
/// | mutual-exclusion lock    | `<ns>/lock/<name>`                 |
#[derive(Debug, Clone)]
pub struct Keyspace {
    root: String,
}

/// Components recovered from a run heartbeat key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcKey {
    pub node_uuid: String,
    pub job_id: i64,
    pub run_id: i64,
}

impl Keyspace {
    pub fn new(namespace: impl Into<String>) -> Self {
        let mut root: String = namespace.into();
        while root.ends_with('/') {
            root.pop();
        }
        Self { root }
    }

    /// Key segments may not contain path separators.
    pub fn valid_segment(segment: &str) -> bool {
        !segment.contains('/') && !segment.contains('\\')
    }

    pub fn job(&self, node_uuid: &str, job_id: i64) -> String {
        format!("{}/job/{}/{}", self.root, node_uuid, job_id)
    }

    pub fn job_prefix(&self, node_uuid: &str) -> String {
        format!("{}/job/{}/", self.root, node_uuid)
    }

    pub fn proc(&self, node_uuid: &str, job_id: i64, run_id: i64) -> String {
        format!("{}/proc/{}/{}/{}", self.root, node_uuid, job_id, run_id)
    }

    pub fn proc_prefix(&self, node_uuid: &str) -> String {
        format!("{}/proc/{}/", self.root, node_uuid)
    }

    pub fn once(&self, job_id: i64) -> String {
        format!("{}/once/{}", self.root, job_id)
    }

    pub fn once_prefix(&self) -> String {
        format!("{}/once/", self.root)
    }

    pub fn system_switch(&self, node_uuid: &str) -> String {
        format!("{}/system/switch/{}", self.root, node_uuid)
    }

    pub fn lock(&self, name: &str) -> String {
        format!("{}/lock/{}", self.root, name)
    }

    /// Invert [`Keyspace::proc`]. Rejects keys with fewer than the
    /// expected path segments or non-numeric id segments.
    pub fn parse_proc_key(key: &str) -> Result<ProcKey> {
        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() < 5 {
            return Err(CronbeatError::ProcKey(key.to_string()));
        }
        let run_id = segments[segments.len() - 1]
            .parse()
            .map_err(|_| CronbeatError::ProcKey(key.to_string()))?;
        let job_id = segments[segments.len() - 2]
            .parse()
            .map_err(|_| CronbeatError::ProcKey(key.to_string()))?;
        Ok(ProcKey {
            node_uuid: segments[segments.len() - 3].to_string(),
            job_id,
            run_id,
        })
    }

    /// The job id is the last segment of an assignment key; 0 when the
    /// key does not end in a number.
    pub fn job_id_from_key(key: &str) -> i64 {
        key.rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_documented_shapes() {
        let ks = Keyspace::new("/cronbeat/");
        assert_eq!(ks.job("n1", 7), "/cronbeat/job/n1/7");
        assert_eq!(ks.job_prefix("n1"), "/cronbeat/job/n1/");
        assert_eq!(ks.proc("n1", 7, 4242), "/cronbeat/proc/n1/7/4242");
        assert_eq!(ks.proc_prefix("n1"), "/cronbeat/proc/n1/");
        assert_eq!(ks.once(7), "/cronbeat/once/7");
        assert_eq!(ks.system_switch("n1"), "/cronbeat/system/switch/n1");
        assert_eq!(ks.lock("assign"), "/cronbeat/lock/assign");
    }

    #[test]
    fn proc_key_round_trip() {
        let ks = Keyspace::new("/cronbeat");
        let key = ks.proc("node-a", 12, 998);
        let parsed = Keyspace::parse_proc_key(&key).unwrap();
        assert_eq!(
            parsed,
            ProcKey {
                node_uuid: "node-a".to_string(),
                job_id: 12,
                run_id: 998,
            }
        );
    }

    #[test]
    fn proc_key_rejects_short_and_non_numeric() {
        assert!(Keyspace::parse_proc_key("/a/b").is_err());
        assert!(Keyspace::parse_proc_key("/cronbeat/proc/n1/x/1").is_err());
        assert!(Keyspace::parse_proc_key("/cronbeat/proc/n1/1/x").is_err());
    }

    #[test]
    fn job_id_from_key_tolerates_garbage() {
        assert_eq!(Keyspace::job_id_from_key("/cronbeat/job/n1/31"), 31);
        assert_eq!(Keyspace::job_id_from_key("/cronbeat/job/n1/abc"), 0);
        assert_eq!(Keyspace::job_id_from_key("no-slashes"), 0);
    }

    #[test]
    fn segment_validation() {
        assert!(Keyspace::valid_segment("node-a"));
        assert!(!Keyspace::valid_segment("a/b"));
        assert!(!Keyspace::valid_segment("a\\b"));
    }
}
