//! Domain records shared across the pipeline.
//!
//! These are plain data carriers: the connector produces them, the builder
//! embeds them, the engine ranks them. Subsystems reference each other by
//! id only; nothing here is mutated after load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event as read from the domain schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub max_attendees: Option<u32>,
    pub organizer: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Candidate = not archived and starts in the future.
    pub fn is_candidate(&self, now: DateTime<Utc>) -> bool {
        !self.archived && self.start_time > now
    }
}

/// Account kind. Organizations behave identically to individuals as
/// viewers, creators, and subjects of social signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    #[default]
    Individual,
    Organization,
}

/// A user (person or organization) as read from the domain schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub kind: AccountKind,
}

/// Interaction kinds that feed user-vector synthesis.
///
/// `FriendGoing` never appears in stored data; the engine synthesizes it
/// per-request from followees' RSVPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Going,
    Interested,
    Organized,
    Viewed,
    FriendGoing,
}

impl InteractionKind {
    /// Base synthesis weight. Table-driven; config may override.
    pub fn base_weight(self) -> f32 {
        match self {
            InteractionKind::Going => 1.5,
            InteractionKind::Interested => 1.0,
            InteractionKind::Organized => 2.0,
            InteractionKind::Viewed => 0.3,
            InteractionKind::FriendGoing => 0.5,
        }
    }
}

/// A single interaction of a user with an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: String,
    pub event_id: i64,
    pub kind: InteractionKind,
    pub created_at: DateTime<Utc>,
}

/// Directed follow edge. Self-loops are rejected at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialEdge {
    pub follower: String,
    pub followee: String,
    pub created_at: DateTime<Utc>,
}

/// RSVP status values that count as friend signals. Both carry equal
/// weight for friend boosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Going,
    Interested,
}

/// A followee's RSVP on a future event, used for social boosts and for
/// synthesizing `FriendGoing` interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRsvp {
    pub friend_id: String,
    pub event_id: i64,
    pub status: RsvpStatus,
    pub created_at: DateTime<Utc>,
}

/// Event-level features carried in the vector store's metadata sidecar,
/// needed at rank time without a connector round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub organizer: String,
    pub category: String,
    pub tags: Vec<String>,
    pub location: String,
    #[serde(default)]
    pub archived: bool,
}

impl From<&Event> for EventMeta {
    fn from(e: &Event) -> Self {
        Self {
            title: e.title.clone(),
            start_time: e.start_time,
            end_time: e.end_time,
            organizer: e.organizer.clone(),
            category: e.category.clone(),
            tags: e.tags.clone(),
            location: e.location.clone(),
            archived: e.archived,
        }
    }
}

/// Per-user bio/interests metadata stored alongside user vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMeta {
    pub username: String,
    pub bio: String,
    pub interests: Vec<String>,
    pub location: String,
    pub kind: AccountKind,
}

impl From<&User> for UserMeta {
    fn from(u: &User) -> Self {
        Self {
            username: u.username.clone(),
            bio: u.bio.clone(),
            interests: u.interests.clone(),
            location: u.location.clone(),
            kind: u.kind,
        }
    }
}
