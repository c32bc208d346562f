//! Deterministic sync engine
//!
//! Runs through the same phases as a real session (start, optional password
//! request, per-source prepare / send / receive / end, server message, end)
//! without any network traffic. Every source exchanges a fixed number of
//! items in each direction its mode allows.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::ServerConfig;
use crate::domain::{
    DomainError, ProgressEvent, ProgressKind, SourceStats, SyncMode, SyncReport, SyncStatus,
};
use crate::ports::sync_engine::{select_sources, SourceRequest, StepOutcome, SyncEngine, SyncRun};

/// [`SyncEngine`] that simulates sessions
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    items_per_source: u32,
    expected_password: Option<String>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            items_per_source: 2,
            expected_password: None,
        }
    }

    /// Items sent and received per source and direction
    pub fn with_items(mut self, items: u32) -> Self {
        self.items_per_source = items;
        self
    }

    /// Fails runs whose password differs from `password`
    pub fn with_expected_password(mut self, password: impl Into<String>) -> Self {
        self.expected_password = Some(password.into());
        self
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine for SimulatedEngine {
    fn start(
        &self,
        server: &str,
        config: &ServerConfig,
        sources: &[SourceRequest],
    ) -> Result<Box<dyn SyncRun>, DomainError> {
        if config.sync_url.is_empty() {
            return Err(DomainError::SyncFailed(format!(
                "{server}: no sync URL configured"
            )));
        }
        let selected = select_sources(server, config, sources)?;
        debug!(server, sources = selected.len(), "Starting simulated sync");
        Ok(Box::new(SimulatedRun::new(
            server,
            config,
            selected,
            self.items_per_source,
            self.expected_password.clone(),
        )))
    }
}

enum Planned {
    Event(ProgressEvent),
    Password,
    Message(String),
    Finish,
}

struct SimulatedRun {
    report: SyncReport,
    sources: Vec<(String, SyncMode)>,
    plan: VecDeque<Planned>,
    password: Option<String>,
    expected_password: Option<String>,
    aborted: bool,
    finished: Option<SyncReport>,
}

impl SimulatedRun {
    fn new(
        server: &str,
        config: &ServerConfig,
        sources: Vec<(String, SyncMode)>,
        items: u32,
        expected_password: Option<String>,
    ) -> Self {
        let mut plan = VecDeque::new();
        plan.push_back(Planned::Event(ProgressEvent::session(
            ProgressKind::SyncStart,
            0,
        )));
        plan.push_back(Planned::Password);

        let total = i32::try_from(items).unwrap_or(i32::MAX);
        let mut report = SyncReport::begin(server);
        for (name, mode) in &sources {
            report.sources.insert(
                name.clone(),
                SourceStats {
                    mode: *mode,
                    ..SourceStats::default()
                },
            );
            plan.push_back(Planned::Event(ProgressEvent::source(
                name,
                ProgressKind::SourcePrepare,
                [mode.code(), 0, 0],
            )));
            let directions = [
                (mode.sends(), ProgressKind::ItemSent),
                (mode.receives(), ProgressKind::ItemReceived),
            ];
            for (enabled, kind) in directions {
                if enabled {
                    for index in 1..=total {
                        plan.push_back(Planned::Event(ProgressEvent::source(
                            name,
                            kind,
                            [index, total, 0],
                        )));
                    }
                }
            }
            plan.push_back(Planned::Event(ProgressEvent::source(
                name,
                ProgressKind::SourceEnd,
                [0, 0, 0],
            )));
        }
        plan.push_back(Planned::Message(format!(
            "{server}: synchronized {} source(s)",
            sources.len()
        )));
        plan.push_back(Planned::Event(ProgressEvent::session(
            ProgressKind::SyncEnd,
            0,
        )));
        plan.push_back(Planned::Finish);

        let password = (!config.password.is_empty()).then(|| config.password.clone());
        Self {
            report,
            sources,
            plan,
            password,
            expected_password,
            aborted: false,
            finished: None,
        }
    }

    fn finish(&mut self, status: SyncStatus) -> StepOutcome {
        let report = self.report.clone().finish(status);
        self.plan.clear();
        self.finished = Some(report.clone());
        StepOutcome::Finished(report)
    }

    /// Updates the counters for `event` and fills in the source totals
    fn account(&mut self, mut event: ProgressEvent) -> ProgressEvent {
        if let Some(stats) = self.report.sources.get_mut(&event.source) {
            match event.kind {
                ProgressKind::ItemSent => stats.sent += 1,
                ProgressKind::ItemReceived => stats.received += 1,
                ProgressKind::SourceEnd => {
                    event.extra = [
                        i32::try_from(stats.sent).unwrap_or(i32::MAX),
                        i32::try_from(stats.received).unwrap_or(i32::MAX),
                        i32::try_from(stats.failed).unwrap_or(i32::MAX),
                    ];
                }
                _ => {}
            }
        }
        event
    }
}

impl SyncRun for SimulatedRun {
    fn step(&mut self) -> StepOutcome {
        if let Some(report) = &self.finished {
            return StepOutcome::Finished(report.clone());
        }
        if self.aborted {
            return self.finish(SyncStatus::Aborted);
        }
        loop {
            let Some(next) = self.plan.pop_front() else {
                return self.finish(SyncStatus::Ok);
            };
            match next {
                Planned::Event(event) => return StepOutcome::Progress(self.account(event)),
                Planned::Message(text) => return StepOutcome::ServerMessage(text),
                Planned::Finish => return self.finish(SyncStatus::Ok),
                Planned::Password => match (&self.password, &self.expected_password) {
                    (None, _) => {
                        self.plan.push_front(Planned::Password);
                        return StepOutcome::NeedPassword;
                    }
                    (Some(given), Some(expected)) if given != expected => {
                        return self.finish(SyncStatus::Failed(
                            "authentication failed".to_string(),
                        ));
                    }
                    _ => continue,
                },
            }
        }
    }

    fn set_password(&mut self, password: &str) {
        self.password = Some(password.to_string());
    }

    fn abort(&mut self) {
        self.aborted = true;
    }

    fn sources(&self) -> Vec<(String, SyncMode)> {
        self.sources.clone()
    }

    fn state(&self) -> String {
        if self.finished.is_some() {
            "done".to_string()
        } else if self.aborted {
            "aborting".to_string()
        } else if matches!(self.plan.front(), Some(Planned::Password)) && self.password.is_none() {
            "waiting for password".to_string()
        } else {
            "running".to_string()
        }
    }
}
