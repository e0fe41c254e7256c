mod scenarios;

use chrono::{Duration, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Config;
use crate::connector::{FixtureConnector, FixtureData};
use crate::domain::{AccountKind, Event, Interaction, InteractionKind, SocialEdge, User};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

pub const TEST_DIM: usize = 32;

pub fn temp_base(tag: &str) -> PathBuf {
    let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "plaza-{tag}-{}-{}",
        std::process::id(),
        counter
    ))
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dim = TEST_DIM;
    config
}

pub fn event(id: i64, title: &str, category: &str, organizer: &str, start_in_days: i64) -> Event {
    let now = Utc::now();
    Event {
        event_id: id,
        title: title.to_string(),
        description: format!("{title} in the {category} series"),
        category: category.to_string(),
        tags: vec![category.to_string(), "local".to_string()],
        location: "Old Town Hall".into(),
        start_time: now + Duration::days(start_in_days),
        end_time: now + Duration::days(start_in_days) + Duration::hours(3),
        max_attendees: Some(200),
        organizer: organizer.to_string(),
        organization: None,
        archived: false,
        archived_at: None,
    }
}

pub fn user(id: &str, interests: &[&str], bio: &str) -> User {
    User {
        user_id: id.to_string(),
        username: format!("name-{id}"),
        bio: bio.to_string(),
        location: "Old Town".into(),
        interests: interests.iter().map(|s| s.to_string()).collect(),
        kind: AccountKind::Individual,
    }
}

pub fn interaction(user_id: &str, event_id: i64, kind: InteractionKind, days_ago: i64) -> Interaction {
    Interaction {
        user_id: user_id.to_string(),
        event_id,
        kind,
        created_at: Utc::now() - Duration::days(days_ago),
    }
}

pub fn follow(follower: &str, followee: &str) -> SocialEdge {
    SocialEdge {
        follower: follower.to_string(),
        followee: followee.to_string(),
        created_at: Utc::now() - Duration::days(45),
    }
}

/// The shared scenario fixture.
///
/// Events 4 and 5 are textual twins (identical canonical text, so the
/// deterministic embedder gives them identical vectors); followees of u2
/// are both going to event 4, making the pair a clean A/B for friend
/// boosts. u5 organizes event 7 and is going to event 8.
pub fn scenario_data() -> FixtureData {
    let categories = ["music", "food", "tech"];
    let mut events: Vec<Event> = (1..=12)
        .map(|i| {
            let category = categories[(i as usize - 1) % 3];
            event(i, &format!("Gathering number {i}"), category, "org_main", i + 2)
        })
        .collect();
    // Twins: same text, same start day, different ids
    events[3] = event(4, "Riverside concert", "music", "org_main", 6);
    events[4] = event(5, "Riverside concert", "music", "org_main", 6);
    // u5's own event
    events[6] = event(7, "Makers meetup", "tech", "u5", 9);

    FixtureData {
        events,
        users: vec![
            user("u1", &["music", "food"], "always out on weekends"),
            user("u2", &["music"], "concert goer"),
            user("u3", &[], ""),
            user("u4", &["food"], ""),
            user("u5", &["tech"], "organizes maker events"),
        ],
        interactions: vec![
            interaction("u2", 10, InteractionKind::Going, 7),
            interaction("u3", 4, InteractionKind::Going, 2),
            interaction("u4", 4, InteractionKind::Going, 1),
            interaction("u3", 9, InteractionKind::Interested, 3),
            interaction("u5", 8, InteractionKind::Going, 2),
        ],
        follows: vec![follow("u2", "u3"), follow("u2", "u4")],
    }
}

pub fn scenario_connector() -> FixtureConnector {
    FixtureConnector::new(scenario_data()).unwrap()
}
