//! Scenario tests over the shared fixture: cold start, social lift,
//! friends-only filtering, exclusions, and the output invariants.

use super::*;
use crate::builder::ModelBuilder;
use crate::embedding::HashEmbedder;
use crate::engine::{CancelToken, ModelHandle, RecRequest, RecommendationEngine, Source};
use crate::store::VectorStore;
use crate::strategy::Strategy;

struct Scenario {
    base: std::path::PathBuf,
    connector: crate::connector::FixtureConnector,
    handle: ModelHandle,
    config: crate::config::Config,
}

impl Scenario {
    fn new(tag: &str) -> Self {
        let base = temp_base(tag);
        let connector = scenario_connector();
        let config = test_config();
        let store = VectorStore::new(base.join("vector_store"));
        let embedder = HashEmbedder::new(TEST_DIM);
        ModelBuilder::new(
            &config,
            &connector,
            &embedder,
            &store,
            base.join("model_artifacts"),
        )
        .run()
        .unwrap();
        let handle = ModelHandle::load(&store, &base.join("model_artifacts")).unwrap();
        Self {
            base,
            connector,
            handle,
            config,
        }
    }

    fn recommend(&self, viewer: &str, k: usize, strategy: Strategy) -> crate::engine::RecResponse {
        let engine = RecommendationEngine::new(&self.config.engine, &self.connector);
        engine
            .recommend(
                &self.handle,
                &RecRequest {
                    viewer_id: viewer.to_string(),
                    k,
                    strategy,
                },
                &CancelToken::new(),
            )
            .unwrap()
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.base);
    }
}

#[test]
fn cold_start_viewer_ranks_by_content() {
    let s = Scenario::new("s1");
    let resp = s.recommend("u1", 5, Strategy::Hybrid);

    assert_eq!(resp.items.len(), 5);
    let now = chrono::Utc::now();
    for item in &resp.items {
        // u1 follows nobody, so nothing social can contribute
        assert!(matches!(item.source, Source::Content | Source::ContentSocial));
        assert_eq!(item.friend_count, 0);
        let meta = s.handle.events.meta(&item.event_id).unwrap();
        assert!(meta.start_time > now);
    }
    // Scores strictly ordered
    for pair in resp.items.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn friend_rsvps_lift_scores_by_the_strategy_step() {
    let s = Scenario::new("s2");

    // Events 4 and 5 share one embedding; only 4 has friends of u2
    let hybrid = s.recommend("u2", 12, Strategy::Hybrid);
    let four = hybrid.items.iter().find(|i| i.event_id == 4).unwrap();
    let five = hybrid.items.iter().find(|i| i.event_id == 5).unwrap();
    assert_eq!(four.friend_count, 2);
    assert_eq!(five.friend_count, 0);
    assert!((four.friend_boost - 1.20).abs() < 1e-6);
    assert!((four.score / five.score - 1.20).abs() < 1e-4);
    assert_eq!(four.source, Source::ContentSocial);
    assert_eq!(five.source, Source::Content);

    let boosted = s.recommend("u2", 12, Strategy::FriendsBoosted);
    let four = boosted.items.iter().find(|i| i.event_id == 4).unwrap();
    let five = boosted.items.iter().find(|i| i.event_id == 5).unwrap();
    assert!((four.friend_boost - 1.60).abs() < 1e-6);
    assert!((four.score / five.score - 1.60).abs() < 1e-4);
}

#[test]
fn friends_only_returns_friend_events_by_count_then_start() {
    let s = Scenario::new("s3");
    let resp = s.recommend("u2", 10, Strategy::FriendsOnly);

    // Event 4 has two friends, event 9 one (u3 interested)
    let ids: Vec<i64> = resp.items.iter().map(|i| i.event_id).collect();
    assert_eq!(ids, vec![4, 9]);
    assert!((resp.items[0].score - 0.60).abs() < 1e-6);
    assert!((resp.items[1].score - 0.30).abs() < 1e-6);
    assert!(resp.items.iter().all(|i| i.source == Source::Social));
    assert!(resp.items.iter().all(|i| i.friend_count >= 1));
}

#[test]
fn organizer_and_committed_events_never_surface() {
    let s = Scenario::new("s5");
    for strategy in [Strategy::Hybrid, Strategy::FriendsBoosted] {
        let resp = s.recommend("u5", 50, strategy);
        let ids: Vec<i64> = resp.items.iter().map(|i| i.event_id).collect();
        assert!(!ids.contains(&7), "{strategy}: organized event 7 surfaced");
        assert!(!ids.contains(&8), "{strategy}: committed event 8 surfaced");
        assert!(!ids.is_empty());
    }

    // u2 is going to event 10
    let resp = s.recommend("u2", 50, Strategy::Hybrid);
    assert!(resp.items.iter().all(|i| i.event_id != 10));
}

#[test]
fn social_source_implies_friend_count() {
    let s = Scenario::new("invariants");
    for viewer in ["u1", "u2", "u5"] {
        for strategy in [Strategy::Hybrid, Strategy::FriendsBoosted, Strategy::FriendsOnly] {
            let resp = s.recommend(viewer, 10, strategy);
            for item in &resp.items {
                if item.source == Source::Social || item.source == Source::ContentSocial {
                    assert!(
                        item.friend_count >= 1,
                        "{viewer}/{strategy}: social tag without friends"
                    );
                }
            }
        }
    }
}

#[test]
fn missing_viewer_fallback_is_ordered_by_start_time() {
    let s = Scenario::new("fallback");
    let resp = s.recommend("nobody-here", 6, Strategy::Hybrid);

    assert!(resp.items.iter().all(|i| i.source == Source::Fallback));
    assert!(resp.items.iter().all(|i| i.score == 0.0));
    let starts: Vec<_> = resp
        .items
        .iter()
        .map(|i| s.handle.events.meta(&i.event_id).unwrap().start_time)
        .collect();
    for pair in starts.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
}

#[test]
fn identical_requests_are_deterministic() {
    let s = Scenario::new("determinism");
    let a = s.recommend("u2", 10, Strategy::Hybrid);
    let b = s.recommend("u2", 10, Strategy::Hybrid);

    assert_eq!(a.items.len(), b.items.len());
    for (x, y) in a.items.iter().zip(&b.items) {
        assert_eq!(x.event_id, y.event_id);
        assert_eq!(x.score, y.score);
        assert_eq!(x.friend_count, y.friend_count);
        assert_eq!(x.rank, y.rank);
    }
    assert_eq!(a.model_version, b.model_version);
}

#[test]
fn smaller_k_is_a_prefix_of_larger_k() {
    let s = Scenario::new("prefix");
    for strategy in [Strategy::Hybrid, Strategy::FriendsBoosted] {
        let small = s.recommend("u2", 4, strategy);
        let large = s.recommend("u2", 9, strategy);
        let small_ids: Vec<i64> = small.items.iter().map(|i| i.event_id).collect();
        let large_ids: Vec<i64> = large.items.iter().map(|i| i.event_id).collect();
        assert_eq!(small_ids[..], large_ids[..small_ids.len()], "{strategy}");
    }
}

#[test]
fn organization_viewers_behave_like_individuals() {
    // Two cold-start viewers with identical profiles, one of them an
    // organization: account kind must not change anything
    let base = temp_base("orgkind");
    let mut data = scenario_data();
    data.users.push(user("indiv_twin", &["music"], "concert goer"));
    let mut org = user("org_twin", &["music"], "concert goer");
    org.kind = crate::domain::AccountKind::Organization;
    data.users.push(org);
    let connector = crate::connector::FixtureConnector::new(data).unwrap();

    let config = test_config();
    let store = VectorStore::new(base.join("vector_store"));
    let embedder = HashEmbedder::new(TEST_DIM);
    ModelBuilder::new(
        &config,
        &connector,
        &embedder,
        &store,
        base.join("model_artifacts"),
    )
    .run()
    .unwrap();
    let handle = ModelHandle::load(&store, &base.join("model_artifacts")).unwrap();

    let engine = RecommendationEngine::new(&config.engine, &connector);
    let recommend = |viewer: &str| {
        engine
            .recommend(
                &handle,
                &RecRequest {
                    viewer_id: viewer.to_string(),
                    k: 8,
                    strategy: Strategy::Hybrid,
                },
                &CancelToken::new(),
            )
            .unwrap()
    };

    let org_resp = recommend("org_twin");
    let indiv_resp = recommend("indiv_twin");
    let org_ids: Vec<i64> = org_resp.items.iter().map(|i| i.event_id).collect();
    let indiv_ids: Vec<i64> = indiv_resp.items.iter().map(|i| i.event_id).collect();
    assert_eq!(org_ids, indiv_ids);
    for (a, b) in org_resp.items.iter().zip(&indiv_resp.items) {
        assert_eq!(a.score, b.score);
    }

    let _ = std::fs::remove_dir_all(&base);
}
