//! Progress events reported while a sync runs

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Kind of a progress event
///
/// The numeric code is what the `Progress` signal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Session with the server started; no extra values
    SyncStart,
    /// Session ended; extra1 is the number of failed sources
    SyncEnd,
    /// Source prepared; extra1 is the numeric sync mode
    SourcePrepare,
    /// Item sent; extra1 is the index, extra2 the total
    ItemSent,
    /// Item received; extra1 is the index, extra2 the total
    ItemReceived,
    /// Source done; extra1 sent, extra2 received, extra3 failed
    SourceEnd,
}

impl ProgressKind {
    pub fn code(&self) -> i32 {
        match self {
            ProgressKind::SyncStart => 0,
            ProgressKind::SyncEnd => 1,
            ProgressKind::SourcePrepare => 2,
            ProgressKind::ItemSent => 3,
            ProgressKind::ItemReceived => 4,
            ProgressKind::SourceEnd => 5,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, DomainError> {
        match code {
            0 => Ok(ProgressKind::SyncStart),
            1 => Ok(ProgressKind::SyncEnd),
            2 => Ok(ProgressKind::SourcePrepare),
            3 => Ok(ProgressKind::ItemSent),
            4 => Ok(ProgressKind::ItemReceived),
            5 => Ok(ProgressKind::SourceEnd),
            other => Err(DomainError::SyncFailed(format!(
                "unknown progress code {other}"
            ))),
        }
    }
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressKind::SyncStart => "sync start",
            ProgressKind::SyncEnd => "sync end",
            ProgressKind::SourcePrepare => "prepare",
            ProgressKind::ItemSent => "item sent",
            ProgressKind::ItemReceived => "item received",
            ProgressKind::SourceEnd => "source end",
        };
        f.write_str(s)
    }
}

/// One progress notification
///
/// `source` is empty for events about the whole session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub source: String,
    pub kind: ProgressKind,
    pub extra: [i32; 3],
}

impl ProgressEvent {
    pub fn session(kind: ProgressKind, extra1: i32) -> Self {
        Self {
            source: String::new(),
            kind,
            extra: [extra1, 0, 0],
        }
    }

    pub fn source(source: impl Into<String>, kind: ProgressKind, extra: [i32; 3]) -> Self {
        Self {
            source: source.into(),
            kind,
            extra,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(
                f,
                "{}: {} ({}, {}, {})",
                self.source, self.kind, self.extra[0], self.extra[1], self.extra[2]
            )
        }
    }
}
