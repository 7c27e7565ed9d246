use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::remote::RemoteError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(self) -> u64 {
        self.0
    }

    pub fn saturating_add_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    pub fn to_clock_string(self) -> String {
        let secs = i64::try_from(self.0).unwrap_or(i64::MAX);

        match DateTime::<Utc>::from_timestamp(secs, 0) {
            Some(at) => at.format("%H:%M:%S").to_string(),
            None => "--:--:--".to_string(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum Phase {
    #[default]
    Idle,
    SubmissionOpen,
    SubmissionClose,
    VotingOpen,
    VotingClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayPolicy {
    #[default]
    None,
    Admin,
    Voting,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Idle,
        Phase::SubmissionOpen,
        Phase::SubmissionClose,
        Phase::VotingOpen,
        Phase::VotingClose,
    ];

    pub fn from_code(code: u64) -> Result<Self, RemoteError> {
        match code {
            0 => Ok(Phase::Idle),
            1 => Ok(Phase::SubmissionOpen),
            2 => Ok(Phase::SubmissionClose),
            3 => Ok(Phase::VotingOpen),
            4 => Ok(Phase::VotingClose),
            other => Err(RemoteError::UnknownPhase(other)),
        }
    }

    pub const fn code(self) -> u64 {
        match self {
            Phase::Idle => 0,
            Phase::SubmissionOpen => 1,
            Phase::SubmissionClose => 2,
            Phase::VotingOpen => 3,
            Phase::VotingClose => 4,
        }
    }

    // The active-group flag. Always derived, never stored.
    pub const fn is_active(self) -> bool {
        !matches!(self, Phase::Idle)
    }

    pub const fn display_policy(self) -> DisplayPolicy {
        match self {
            Phase::SubmissionClose | Phase::VotingOpen => DisplayPolicy::Admin,
            Phase::SubmissionOpen | Phase::VotingClose => DisplayPolicy::Voting,
            Phase::Idle => DisplayPolicy::None,
        }
    }

    pub const fn deadline_label(self) -> Option<&'static str> {
        match self {
            Phase::SubmissionOpen => Some("Next submission"),
            Phase::SubmissionClose => Some("End of submission"),
            Phase::VotingOpen => Some("Next vote"),
            Phase::VotingClose => Some("End of vote"),
            Phase::Idle => None,
        }
    }

    pub fn deadline_message(self, next_trigger: Timestamp) -> Option<String> {
        self.deadline_label()
            .map(|label| format!("{label}: {}", next_trigger.to_clock_string()))
    }
}

impl TryFrom<u64> for Phase {
    type Error = RemoteError;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        Phase::from_code(code)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::SubmissionOpen => "submission_open",
            Phase::SubmissionClose => "submission_close",
            Phase::VotingOpen => "voting_open",
            Phase::VotingClose => "voting_close",
        };
        f.write_str(name)
    }
}
