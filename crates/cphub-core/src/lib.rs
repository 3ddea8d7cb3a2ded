//! Core domain model for contest hub.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "cphub-core";

/// Source family a contest belongs to. Serialized lowercased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Codeforces,
    Codechef,
    Leetcode,
    Atcoder,
    Geeksforgeeks,
    Hackerrank,
    Hackerearth,
    Topcoder,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::Codeforces,
        Platform::Codechef,
        Platform::Leetcode,
        Platform::Atcoder,
        Platform::Geeksforgeeks,
        Platform::Hackerrank,
        Platform::Hackerearth,
        Platform::Topcoder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Codeforces => "codeforces",
            Platform::Codechef => "codechef",
            Platform::Leetcode => "leetcode",
            Platform::Atcoder => "atcoder",
            Platform::Geeksforgeeks => "geeksforgeeks",
            Platform::Hackerrank => "hackerrank",
            Platform::Hackerearth => "hackerearth",
            Platform::Topcoder => "topcoder",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown platform `{0}`")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or(UnknownPlatform(s.to_string()))
    }
}

/// Lifecycle bucket of a contest relative to wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContestStatus {
    #[default]
    Upcoming,
    Running,
    Finished,
}

impl ContestStatus {
    /// Classifies `[start, end)` against `now`. A contest is running only while `now < end`.
    pub fn at(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if start > now {
            ContestStatus::Upcoming
        } else if now < end {
            ContestStatus::Running
        } else {
            ContestStatus::Finished
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContestStatus::Upcoming => "upcoming",
            ContestStatus::Running => "running",
            ContestStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for ContestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown contest status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for ContestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(ContestStatus::Upcoming),
            "running" => Ok(ContestStatus::Running),
            "finished" => Ok(ContestStatus::Finished),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Candidate handed from adapters into the aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestDraft {
    pub name: String,
    pub platform: Platform,
    pub platform_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: i64,
    pub url: String,
}

/// Reason a candidate was dropped during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing name")]
    MissingName,
    #[error("missing url")]
    MissingUrl,
    #[error("start time is not in the future")]
    NotInFuture,
    #[error("end time does not follow start time")]
    EndBeforeStart,
    #[error("negative duration")]
    NegativeDuration,
}

impl ContestDraft {
    /// Builds a draft whose duration is derived from the two timestamps.
    pub fn new(
        platform: Platform,
        platform_id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            platform,
            platform_id: platform_id.into(),
            start_time,
            end_time,
            duration_secs: (end_time - start_time).num_seconds(),
            url: url.into(),
        }
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), Rejection> {
        if self.name.trim().is_empty() {
            return Err(Rejection::MissingName);
        }
        if self.url.trim().is_empty() {
            return Err(Rejection::MissingUrl);
        }
        if self.start_time <= now {
            return Err(Rejection::NotInFuture);
        }
        if self.end_time <= self.start_time {
            return Err(Rejection::EndBeforeStart);
        }
        if self.duration_secs < 0 {
            return Err(Rejection::NegativeDuration);
        }
        Ok(())
    }

    /// Primary natural key.
    pub fn id_key(&self) -> (Platform, &str) {
        (self.platform, self.platform_id.as_str())
    }

    /// Fallback natural key for sources whose ids are unstable.
    pub fn name_key(&self) -> (Platform, &str) {
        (self.platform, self.name.as_str())
    }
}

/// Canonical persisted contest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contest {
    pub id: Uuid,
    pub name: String,
    pub platform: Platform,
    pub platform_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(rename = "duration")]
    pub duration_secs: i64,
    pub url: String,
    pub status: ContestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contest {
    /// Fresh row for a first sighting; status always starts as upcoming.
    pub fn from_draft(draft: &ContestDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: draft.name.clone(),
            platform: draft.platform,
            platform_id: draft.platform_id.clone(),
            start_time: draft.start_time,
            end_time: draft.end_time,
            duration_secs: draft.duration_secs,
            url: draft.url.clone(),
            status: ContestStatus::Upcoming,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites every mutable field from `draft`; identity and `created_at` survive.
    pub fn overwrite_from(&mut self, draft: &ContestDraft, now: DateTime<Utc>) {
        self.name = draft.name.clone();
        self.platform_id = draft.platform_id.clone();
        self.start_time = draft.start_time;
        self.end_time = draft.end_time;
        self.duration_secs = draft.duration_secs;
        self.url = draft.url.clone();
        self.status = ContestStatus::Upcoming;
        self.updated_at = now;
    }

    pub fn matches(&self, draft: &ContestDraft) -> bool {
        self.platform == draft.platform
            && (self.platform_id == draft.platform_id || self.name == draft.name)
    }

    pub fn derived_status(&self, now: DateTime<Utc>) -> ContestStatus {
        ContestStatus::at(self.start_time, self.end_time, now)
    }
}

/// Row counts moved into each bucket by one status recompute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransitions {
    pub finished: u64,
    pub running: u64,
    pub upcoming: u64,
}

impl StatusTransitions {
    pub fn total(&self) -> u64 {
        self.finished + self.running + self.upcoming
    }
}
