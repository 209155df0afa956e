//! Reward policies.
//!
//! Every step pays a flat [`STEP_COST`]. On top of that, exactly one
//! [`RewardMode`] is active per environment and decides which pickup, drop
//! and per-step contributions apply. The functions here are pure; the
//! environment feeds them the facts of the transition and applies the
//! resulting state change.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, environment::Action};

/// Flat cost subtracted on every step, whatever the action.
pub const STEP_COST: f64 = 0.1;

pub const DELIVERY_REWARD: f64 = 10.0;
pub const WRONG_BIN_PENALTY: f64 = -5.0;
pub const ANY_DELIVERY_REWARD: f64 = 5.0;
pub const PICKUP_REWARD: f64 = 1.0;
pub const CARRY_BONUS: f64 = 5.0;
pub const ALIVE_BONUS: f64 = 1.0;

/// Selects the reward policy of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMode {
    /// Delivering into the matching bin pays, a wrong bin costs.
    #[default]
    Correct,
    /// Successful pickups pay.
    Pickup,
    /// Dropping into any bin pays, regardless of color.
    AnyDelivery,
    /// Moving while carrying pays.
    MoveObject,
    /// Every step pays.
    StepAlive,
}

/// What happens to a held object dropped onto a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinDrop {
    /// Colors match: the object is delivered.
    Deliver,
    /// Colors differ: the object is left on the bin's cell, undelivered.
    Reject,
    /// The object leaves the grid without being delivered.
    ///
    /// Only `any_delivery` produces this. The object ends up neither held,
    /// on the grid, nor delivered, so an episode containing it can only end
    /// by truncation. Do not turn this into a delivery without confirming the
    /// intended semantics of the mode; tests pin the current behavior.
    Vanish,
}

impl BinDrop {
    pub fn reward(self) -> f64 {
        match self {
            BinDrop::Deliver => DELIVERY_REWARD,
            BinDrop::Reject => WRONG_BIN_PENALTY,
            BinDrop::Vanish => ANY_DELIVERY_REWARD,
        }
    }
}

impl RewardMode {
    pub const ALL: [RewardMode; 5] = [
        RewardMode::Correct,
        RewardMode::Pickup,
        RewardMode::AnyDelivery,
        RewardMode::MoveObject,
        RewardMode::StepAlive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RewardMode::Correct => "correct",
            RewardMode::Pickup => "pickup",
            RewardMode::AnyDelivery => "any_delivery",
            RewardMode::MoveObject => "move_object",
            RewardMode::StepAlive => "step_alive",
        }
    }

    /// Whether PICK goes through the rewarded pickup path.
    pub fn rewards_pickup(self) -> bool {
        self == RewardMode::Pickup
    }

    /// Reward for a PICK action, given whether it took the agent from empty-handed to holding.
    pub fn pickup_reward(self, picked_up: bool) -> f64 {
        if self.rewards_pickup() && picked_up {
            PICKUP_REWARD
        } else {
            0.0
        }
    }

    /// Outcome of dropping a held object onto a bin.
    ///
    /// `None` means the mode has no bin rule and the object is dropped on the
    /// floor like anywhere else.
    pub fn bin_drop(self, color_matches: bool) -> Option<BinDrop> {
        match self {
            RewardMode::Correct if color_matches => Some(BinDrop::Deliver),
            RewardMode::Correct => Some(BinDrop::Reject),
            RewardMode::AnyDelivery => Some(BinDrop::Vanish),
            RewardMode::Pickup | RewardMode::MoveObject | RewardMode::StepAlive => None,
        }
    }

    /// Per-step bonus, evaluated after pickup and drop handling.
    pub fn step_bonus(self, action: Action, holding: bool) -> f64 {
        match self {
            RewardMode::MoveObject if action.is_movement() && holding => CARRY_BONUS,
            RewardMode::StepAlive => ALIVE_BONUS,
            _ => 0.0,
        }
    }
}

impl fmt::Display for RewardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RewardMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RewardMode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownRewardMode(wanted.to_string()))
    }
}
