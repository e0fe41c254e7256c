//! Scoring strategies.
//!
//! A closed enumeration mapping to weight rows. The engine resolves the
//! row once per request; nothing downstream matches on the strategy name
//! again. Adding a strategy is adding a row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Hybrid,
    FriendsOnly,
    FriendsBoosted,
}

/// Weight row governing how a candidate's score is assembled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyWeights {
    /// Multiplier on the cosine base similarity.
    pub base_sim_weight: f32,
    /// Boost added per friend, up to the cap.
    pub friend_step: f32,
    /// Friend count beyond this contributes nothing.
    pub friend_cap: u32,
    /// Drop candidates with zero friend signals entirely.
    pub drop_no_friends: bool,
}

impl Strategy {
    pub fn weights(self) -> StrategyWeights {
        match self {
            Strategy::Hybrid => StrategyWeights {
                base_sim_weight: 1.0,
                friend_step: 0.10,
                friend_cap: 5,
                drop_no_friends: false,
            },
            Strategy::FriendsBoosted => StrategyWeights {
                base_sim_weight: 1.0,
                friend_step: 0.30,
                friend_cap: 5,
                drop_no_friends: false,
            },
            Strategy::FriendsOnly => StrategyWeights {
                base_sim_weight: 0.0,
                friend_step: 0.30,
                friend_cap: 5,
                drop_no_friends: true,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Hybrid => "hybrid",
            Strategy::FriendsOnly => "friends_only",
            Strategy::FriendsBoosted => "friends_boosted",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown strategy '{0}'. Supported: hybrid, friends_only, friends_boosted")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(Strategy::Hybrid),
            "friends_only" => Ok(Strategy::FriendsOnly),
            "friends_boosted" => Ok(Strategy::FriendsBoosted),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}
