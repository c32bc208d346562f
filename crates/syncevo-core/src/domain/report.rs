//! Reports of finished syncs
//!
//! A [`SyncReport`] is produced by the engine when a sync ends, however it
//! ends. The service keeps the most recent ones per server in a
//! [`ReportLog`].

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sync_mode::SyncMode;

/// Final status of a sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// All sources were synchronized
    Ok,
    /// The sync stopped with an error message
    Failed(String),
    /// The sync was aborted by a client or because its client went away
    Aborted,
}

impl SyncStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SyncStatus::Ok)
    }

    /// Short name without the error message
    pub fn name(&self) -> &'static str {
        match self {
            SyncStatus::Ok => "ok",
            SyncStatus::Failed(_) => "failed",
            SyncStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Failed(msg) => write!(f, "failed: {}", msg),
            other => f.write_str(other.name()),
        }
    }
}

/// Per-source counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub mode: SyncMode,
    pub sent: u32,
    pub received: u32,
    pub failed: u32,
}

/// Outcome of one sync with one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub server: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SyncStatus,
    pub sources: BTreeMap<String, SourceStats>,
}

impl SyncReport {
    /// Starts a report; `end` is set by [`SyncReport::finish`]
    pub fn begin(server: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            server: server.into(),
            start: now,
            end: now,
            status: SyncStatus::Ok,
            sources: BTreeMap::new(),
        }
    }

    pub fn finish(mut self, status: SyncStatus) -> Self {
        self.end = Utc::now();
        self.status = status;
        self
    }

    /// Flat key/value form used by `GetSyncReports`
    ///
    /// Source counters are stored as `source-<name>-<counter>`.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("server".to_string(), self.server.clone());
        map.insert("start".to_string(), self.start.to_rfc3339());
        map.insert("end".to_string(), self.end.to_rfc3339());
        map.insert("status".to_string(), self.status.name().to_string());
        if let SyncStatus::Failed(msg) = &self.status {
            map.insert("error".to_string(), msg.clone());
        }
        for (name, stats) in &self.sources {
            let key = |counter: &str| format!("source-{name}-{counter}");
            map.insert(key("mode"), stats.mode.to_string());
            map.insert(key("sent"), stats.sent.to_string());
            map.insert(key("received"), stats.received.to_string());
            map.insert(key("failed"), stats.failed.to_string());
        }
        map
    }
}

/// Bounded list of reports, newest first
#[derive(Debug, Clone)]
pub struct ReportLog {
    max: usize,
    reports: VecDeque<SyncReport>,
}

impl ReportLog {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            reports: VecDeque::new(),
        }
    }

    /// Adds a report, dropping the oldest ones beyond the limit
    pub fn push(&mut self, report: SyncReport) {
        self.reports.push_front(report);
        self.reports.truncate(self.max);
    }

    /// Up to `count` most recent reports of `server`, newest first
    pub fn newest(&self, server: &str, count: usize) -> Vec<&SyncReport> {
        self.reports
            .iter()
            .filter(|report| report.server == server)
            .take(count)
            .collect()
    }

    /// Drops all reports of `server`
    pub fn remove_server(&mut self, server: &str) {
        self.reports.retain(|report| report.server != server);
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(server: &str, status: SyncStatus) -> SyncReport {
        SyncReport::begin(server).finish(status)
    }

    #[test]
    fn test_map_contains_source_counters() {
        let mut report = SyncReport::begin("scheduleworld");
        report.sources.insert(
            "addressbook".to_string(),
            SourceStats {
                mode: SyncMode::Slow,
                sent: 2,
                received: 3,
                failed: 0,
            },
        );
        let map = report.finish(SyncStatus::Failed("timeout".to_string())).to_map();
        assert_eq!(map["server"], "scheduleworld");
        assert_eq!(map["status"], "failed");
        assert_eq!(map["error"], "timeout");
        assert_eq!(map["source-addressbook-mode"], "slow");
        assert_eq!(map["source-addressbook-sent"], "2");
        assert_eq!(map["source-addressbook-received"], "3");
        assert!(map["start"] <= map["end"]);
    }

    #[test]
    fn test_log_is_bounded_and_newest_first() {
        let mut log = ReportLog::new(3);
        log.push(report("a", SyncStatus::Ok));
        log.push(report("a", SyncStatus::Aborted));
        log.push(report("b", SyncStatus::Ok));
        log.push(report("a", SyncStatus::Failed("x".to_string())));
        assert_eq!(log.len(), 3);

        let newest = log.newest("a", 10);
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].status, SyncStatus::Failed("x".to_string()));
        assert_eq!(newest[1].status, SyncStatus::Aborted);
        assert_eq!(log.newest("a", 1).len(), 1);

        log.remove_server("a");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SyncStatus::Ok.to_string(), "ok");
        assert_eq!(
            SyncStatus::Failed("no route".to_string()).to_string(),
            "failed: no route"
        );
        assert!(!SyncStatus::Aborted.is_ok());
    }
}
