//! Sync engine port
//!
//! The engine that talks SyncML to a server lives behind these traits.
//! A sync is never run to completion in one call: the caller advances it
//! with [`SyncRun::step`] from its event loop, so a single step must not
//! block for long.
//!
//! ## Design Notes
//!
//! - Not `Send`: runs are owned by the single-threaded D-Bus service.
//! - Password requests are a step outcome; the run makes no progress until
//!   [`SyncRun::set_password`] or [`SyncRun::abort`] is called.

use crate::config::ServerConfig;
use crate::domain::{DomainError, ProgressEvent, SyncMode, SyncReport};

/// A source to synchronize and the mode to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    pub name: String,
    /// `None` uses the mode from the configuration.
    pub mode: Option<SyncMode>,
}

impl SourceRequest {
    pub fn new(name: impl Into<String>, mode: Option<SyncMode>) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }
}

/// Result of advancing a run by one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Progress(ProgressEvent),
    /// Text sent by the server for display to the user
    ServerMessage(String),
    /// The run waits for a password
    NeedPassword,
    /// The run is over; no further steps are taken
    Finished(SyncReport),
}

/// One sync in progress
pub trait SyncRun {
    /// Advances the run
    ///
    /// While a password is outstanding this keeps returning
    /// [`StepOutcome::NeedPassword`].
    fn step(&mut self) -> StepOutcome;

    fn set_password(&mut self, password: &str);

    /// Requests the run to stop; the next step finishes it
    fn abort(&mut self);

    /// Sources taking part, with their effective modes
    fn sources(&self) -> Vec<(String, SyncMode)>;

    /// Short state description, e.g. `"running"` or `"waiting for password"`
    fn state(&self) -> String;
}

/// Factory for sync runs
pub trait SyncEngine {
    /// Prepares a sync of `server`
    ///
    /// An empty `sources` list selects all enabled sources of the
    /// configuration.
    fn start(
        &self,
        server: &str,
        config: &ServerConfig,
        sources: &[SourceRequest],
    ) -> Result<Box<dyn SyncRun>, DomainError>;
}

/// Resolves the requested sources against the configuration
pub fn select_sources(
    server: &str,
    config: &ServerConfig,
    sources: &[SourceRequest],
) -> Result<Vec<(String, SyncMode)>, DomainError> {
    if sources.is_empty() {
        return Ok(config
            .enabled_sources()
            .map(|(name, mode)| (name.to_string(), mode))
            .collect());
    }
    sources
        .iter()
        .map(|request| {
            let configured =
                config
                    .sources
                    .get(&request.name)
                    .ok_or_else(|| DomainError::NoSuchSource {
                        server: server.to_string(),
                        source_name: request.name.clone(),
                    })?;
            Ok((request.name.clone(), request.mode.unwrap_or(configured.sync)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    fn config() -> ServerConfig {
        ServerConfig::new("http://example.com")
            .with_source("addressbook", SourceConfig::new("card", SyncMode::TwoWay))
            .with_source("memo", SourceConfig::new("note", SyncMode::None))
    }

    #[test]
    fn test_empty_request_selects_enabled_sources() {
        let selected = select_sources("work", &config(), &[]).unwrap();
        assert_eq!(selected, vec![("addressbook".to_string(), SyncMode::TwoWay)]);
    }

    #[test]
    fn test_explicit_mode_overrides_configuration() {
        let selected = select_sources(
            "work",
            &config(),
            &[
                SourceRequest::new("memo", Some(SyncMode::Slow)),
                SourceRequest::new("addressbook", None),
            ],
        )
        .unwrap();
        assert_eq!(
            selected,
            vec![
                ("memo".to_string(), SyncMode::Slow),
                ("addressbook".to_string(), SyncMode::TwoWay),
            ]
        );
    }

    #[test]
    fn test_unknown_source() {
        let err = select_sources("work", &config(), &[SourceRequest::new("todo", None)]).unwrap_err();
        assert_eq!(
            err,
            DomainError::NoSuchSource {
                server: "work".to_string(),
                source_name: "todo".to_string(),
            }
        );
    }
}
