use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::config;

/// Telegram user identifier
pub type UserId = i64;

/// Identifier of a finalized appeal
pub type AppealId = i64;

/// Which photo stash of a user an operation targets.
///
/// Photos land in `Current` while the appeal is being composed and move to
/// `Appeal(id)` once the appeal is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StashId {
    #[default]
    Current,
    Appeal(AppealId),
}

impl StashId {
    pub fn is_current(&self) -> bool {
        matches!(self, StashId::Current)
    }

    /// Directory name used under `<root>/<user_id>/`
    pub fn dir_name(&self) -> String {
        self.to_string()
    }
}

impl From<AppealId> for StashId {
    fn from(id: AppealId) -> Self {
        StashId::Appeal(id)
    }
}

impl fmt::Display for StashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StashId::Current => f.write_str(config::photos::CURRENT_STASH),
            StashId::Appeal(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for StashId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == config::photos::CURRENT_STASH {
            return Ok(StashId::Current);
        }
        s.parse::<AppealId>()
            .map(StashId::Appeal)
            .map_err(|_| format!("invalid stash id: {}", s))
    }
}

impl From<StashId> for String {
    fn from(id: StashId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for StashId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
