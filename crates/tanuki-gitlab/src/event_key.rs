//! Stable correlation keys for notifiable GitLab resources.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDateTime, Utc};

const CANONICAL_CREATED_AT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Identifies a note for de-duplication purposes.
///
/// Commit comments carry no usable note id in every path that reports them,
/// so they fall back to the creation timestamp. Two commit comments created in
/// the same second on the same project collide and the second is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NoteRef {
    Id(u64),
    CreatedAt(String),
}

impl NoteRef {
    /// Keys a note by creation time at second precision in UTC. The REST API
    /// reports `2024-03-01T09:10:00.000Z` where webhooks carry
    /// `2024-03-01 09:10:00 UTC`; both map to the same key. Unparseable values
    /// are kept verbatim.
    pub fn created_at(raw: &str) -> Self {
        let raw = raw.trim();
        let parsed = DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z"))
            .map(|value| value.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S UTC")
                    .map(|value| value.and_utc())
            });
        match parsed {
            Ok(value) => Self::CreatedAt(value.format(CANONICAL_CREATED_AT).to_string()),
            Err(_) => Self::CreatedAt(raw.to_string()),
        }
    }
}

impl Display for NoteRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::CreatedAt(created_at) => f.write_str(created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Commit(String),
    Issue(u64),
    MergeRequest(u64),
    Snippet(u64),
    Note { project_id: u64, note: NoteRef },
}

impl EventKey {
    pub fn commit(sha: impl Into<String>) -> Self {
        Self::Commit(sha.into())
    }

    pub fn note(project_id: u64, note: NoteRef) -> Self {
        Self::Note { project_id, note }
    }
}

impl Display for EventKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Commit(sha) => write!(f, "commit_{sha}"),
            Self::Issue(id) => write!(f, "issue_{id}"),
            Self::MergeRequest(id) => write!(f, "mr_{id}"),
            Self::Snippet(id) => write!(f, "snippet_{id}"),
            Self::Note { project_id, note } => write!(f, "note_{project_id}_{note}"),
        }
    }
}
