//! Sync modes
//!
//! A source is synchronized in one of these modes. On the bus a mode travels
//! as its numeric code, in configuration files and on the command line as
//! its name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// How the items of one source are exchanged with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Source is not synchronized
    None,
    /// Exchange changes in both directions
    #[default]
    TwoWay,
    /// Compare all items in both directions
    Slow,
    /// Send local changes only
    OneWayFromClient,
    /// Replace server data with local data
    RefreshFromClient,
    /// Receive server changes only
    OneWayFromServer,
    /// Replace local data with server data
    RefreshFromServer,
}

const ALL: [SyncMode; 7] = [
    SyncMode::None,
    SyncMode::TwoWay,
    SyncMode::Slow,
    SyncMode::OneWayFromClient,
    SyncMode::RefreshFromClient,
    SyncMode::OneWayFromServer,
    SyncMode::RefreshFromServer,
];

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::None => "none",
            SyncMode::TwoWay => "two-way",
            SyncMode::Slow => "slow",
            SyncMode::OneWayFromClient => "one-way-from-client",
            SyncMode::RefreshFromClient => "refresh-from-client",
            SyncMode::OneWayFromServer => "one-way-from-server",
            SyncMode::RefreshFromServer => "refresh-from-server",
        }
    }

    /// Numeric code used on the bus
    pub fn code(&self) -> i32 {
        match self {
            SyncMode::None => 0,
            SyncMode::TwoWay => 1,
            SyncMode::Slow => 2,
            SyncMode::OneWayFromClient => 3,
            SyncMode::RefreshFromClient => 4,
            SyncMode::OneWayFromServer => 5,
            SyncMode::RefreshFromServer => 6,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, DomainError> {
        ALL.iter()
            .copied()
            .find(|mode| mode.code() == code)
            .ok_or_else(|| DomainError::InvalidSyncMode(code.to_string()))
    }

    /// Returns true if the source takes part in a sync
    pub fn is_enabled(&self) -> bool {
        *self != SyncMode::None
    }

    /// Returns true if items go from the client to the server
    pub fn sends(&self) -> bool {
        matches!(
            self,
            SyncMode::TwoWay
                | SyncMode::Slow
                | SyncMode::OneWayFromClient
                | SyncMode::RefreshFromClient
        )
    }

    /// Returns true if items go from the server to the client
    pub fn receives(&self) -> bool {
        matches!(
            self,
            SyncMode::TwoWay
                | SyncMode::Slow
                | SyncMode::OneWayFromServer
                | SyncMode::RefreshFromServer
        )
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "disabled" and "off" are accepted as aliases for "none"
        match s {
            "disabled" | "off" => Ok(SyncMode::None),
            _ => ALL
                .iter()
                .copied()
                .find(|mode| mode.as_str() == s)
                .ok_or_else(|| DomainError::InvalidSyncMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for mode in ALL {
            assert_eq!(mode.as_str().parse::<SyncMode>().unwrap(), mode);
            assert_eq!(SyncMode::from_code(mode.code()).unwrap(), mode);
        }
        assert_eq!("disabled".parse::<SyncMode>().unwrap(), SyncMode::None);
    }

    #[test]
    fn test_invalid_mode() {
        assert_eq!(
            "sideways".parse::<SyncMode>(),
            Err(DomainError::InvalidSyncMode("sideways".to_string()))
        );
        assert!(SyncMode::from_code(7).is_err());
        assert!(SyncMode::from_code(-1).is_err());
    }

    #[test]
    fn test_directions() {
        assert!(SyncMode::TwoWay.sends() && SyncMode::TwoWay.receives());
        assert!(SyncMode::RefreshFromClient.sends());
        assert!(!SyncMode::RefreshFromClient.receives());
        assert!(!SyncMode::OneWayFromServer.sends());
        assert!(!SyncMode::None.sends() && !SyncMode::None.receives());
        assert!(!SyncMode::None.is_enabled());
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let yaml = serde_yaml::to_string(&SyncMode::RefreshFromServer).unwrap();
        assert_eq!(yaml.trim(), "refresh-from-server");
        let mode: SyncMode = serde_yaml::from_str("one-way-from-client").unwrap();
        assert_eq!(mode, SyncMode::OneWayFromClient);
    }
}
