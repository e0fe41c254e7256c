//! Read-only view of the domain schema.
//!
//! The core never talks to the database directly; it goes through the
//! `Connector` trait so serving and the model builder can be pointed at a
//! production backend or at a deterministic JSON fixture. All methods are
//! idempotent reads returning well-typed records.
//!
//! The fixture file matches the record schema one-to-one:
//! `{ "events": [...], "users": [...], "interactions": [...],
//!    "follows": [...] }`.
//! `organized` interactions are derived from event authorship at load, so
//! fixtures only need to carry going/interested/viewed rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::domain::{
    Event, FriendRsvp, Interaction, InteractionKind, RsvpStatus, SocialEdge, User,
};

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fixture parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid fixture: {0}")]
    Invalid(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Read methods the core depends on.
pub trait Connector: Send + Sync {
    /// Non-archived events with a start time in the future.
    fn future_events(&self) -> Result<Vec<Event>, ConnectorError>;

    /// All active users.
    fn active_users(&self) -> Result<Vec<User>, ConnectorError>;

    /// A single user by id.
    fn user(&self, user_id: &str) -> Result<Option<User>, ConnectorError>;

    /// A user's interactions at or after `cutoff`, newest first.
    fn interactions_since(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Interaction>, ConnectorError>;

    /// Ids the user follows.
    fn followees(&self, user_id: &str) -> Result<Vec<String>, ConnectorError>;

    /// Distinct category names.
    fn categories(&self) -> Result<Vec<String>, ConnectorError>;

    /// Distinct tag names.
    fn tags(&self) -> Result<Vec<String>, ConnectorError>;

    /// The viewer's followees that are going/interested on one event.
    fn friends_attending(
        &self,
        viewer_id: &str,
        event_id: i64,
    ) -> Result<Vec<FriendRsvp>, ConnectorError>;

    /// All followee RSVPs on future non-archived events.
    fn friend_rsvps(&self, viewer_id: &str) -> Result<Vec<FriendRsvp>, ConnectorError>;
}

/// On-disk fixture shape. Field names match the record schema exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureData {
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub follows: Vec<SocialEdge>,
}

/// Connector backed by an in-memory fixture.
pub struct FixtureConnector {
    data: FixtureData,
}

impl FixtureConnector {
    /// Build from already-parsed fixture data. Derives `organized`
    /// interactions from event authorship and validates the follow graph.
    pub fn new(mut data: FixtureData) -> Result<Self, ConnectorError> {
        for edge in &data.follows {
            if edge.follower == edge.followee {
                return Err(ConnectorError::Invalid(format!(
                    "self-loop follow for '{}'",
                    edge.follower
                )));
            }
        }

        let mut seen: HashSet<(String, i64)> = data
            .interactions
            .iter()
            .filter(|i| i.kind == InteractionKind::Organized)
            .map(|i| (i.user_id.clone(), i.event_id))
            .collect();
        let derived: Vec<Interaction> = data
            .events
            .iter()
            .filter(|e| seen.insert((e.organizer.clone(), e.event_id)))
            .map(|e| Interaction {
                user_id: e.organizer.clone(),
                event_id: e.event_id,
                kind: InteractionKind::Organized,
                created_at: e.start_time,
            })
            .collect();
        data.interactions.extend(derived);

        Ok(Self { data })
    }

    /// Load a fixture file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let bytes = std::fs::read(path.as_ref())?;
        let data: FixtureData = serde_json::from_slice(&bytes)?;
        log::info!(
            "loaded fixture: {} events, {} users, {} interactions, {} follows",
            data.events.len(),
            data.users.len(),
            data.interactions.len(),
            data.follows.len()
        );
        Self::new(data)
    }

    fn followee_set(&self, viewer_id: &str) -> HashSet<&str> {
        self.data
            .follows
            .iter()
            .filter(|e| e.follower == viewer_id)
            .map(|e| e.followee.as_str())
            .collect()
    }

    fn rsvp_status(kind: InteractionKind) -> Option<RsvpStatus> {
        match kind {
            InteractionKind::Going => Some(RsvpStatus::Going),
            InteractionKind::Interested => Some(RsvpStatus::Interested),
            _ => None,
        }
    }
}

impl Connector for FixtureConnector {
    fn future_events(&self) -> Result<Vec<Event>, ConnectorError> {
        let now = Utc::now();
        let mut events: Vec<Event> = self
            .data
            .events
            .iter()
            .filter(|e| e.is_candidate(now))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.start_time, e.event_id));
        Ok(events)
    }

    fn active_users(&self) -> Result<Vec<User>, ConnectorError> {
        Ok(self.data.users.clone())
    }

    fn user(&self, user_id: &str) -> Result<Option<User>, ConnectorError> {
        Ok(self
            .data
            .users
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned())
    }

    fn interactions_since(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Interaction>, ConnectorError> {
        let mut out: Vec<Interaction> = self
            .data
            .interactions
            .iter()
            .filter(|i| i.user_id == user_id && i.created_at >= cutoff)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    fn followees(&self, user_id: &str) -> Result<Vec<String>, ConnectorError> {
        let mut out: Vec<String> = self
            .followee_set(user_id)
            .into_iter()
            .map(str::to_string)
            .collect();
        out.sort();
        Ok(out)
    }

    fn categories(&self) -> Result<Vec<String>, ConnectorError> {
        let mut set: Vec<String> = self
            .data
            .events
            .iter()
            .map(|e| e.category.clone())
            .filter(|c| !c.is_empty())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        set.sort();
        Ok(set)
    }

    fn tags(&self) -> Result<Vec<String>, ConnectorError> {
        let mut set: Vec<String> = self
            .data
            .events
            .iter()
            .flat_map(|e| e.tags.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        set.sort();
        Ok(set)
    }

    fn friends_attending(
        &self,
        viewer_id: &str,
        event_id: i64,
    ) -> Result<Vec<FriendRsvp>, ConnectorError> {
        let followees = self.followee_set(viewer_id);
        Ok(self
            .data
            .interactions
            .iter()
            .filter(|i| i.event_id == event_id && followees.contains(i.user_id.as_str()))
            .filter_map(|i| {
                Self::rsvp_status(i.kind).map(|status| FriendRsvp {
                    friend_id: i.user_id.clone(),
                    event_id: i.event_id,
                    status,
                    created_at: i.created_at,
                })
            })
            .collect())
    }

    fn friend_rsvps(&self, viewer_id: &str) -> Result<Vec<FriendRsvp>, ConnectorError> {
        let now = Utc::now();
        let followees = self.followee_set(viewer_id);
        let future: HashSet<i64> = self
            .data
            .events
            .iter()
            .filter(|e| e.is_candidate(now))
            .map(|e| e.event_id)
            .collect();
        Ok(self
            .data
            .interactions
            .iter()
            .filter(|i| {
                followees.contains(i.user_id.as_str()) && future.contains(&i.event_id)
            })
            .filter_map(|i| {
                Self::rsvp_status(i.kind).map(|status| FriendRsvp {
                    friend_id: i.user_id.clone(),
                    event_id: i.event_id,
                    status,
                    created_at: i.created_at,
                })
            })
            .collect())
    }
}
