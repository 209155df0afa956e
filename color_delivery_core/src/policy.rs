use image::RgbImage;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    Position,
    environment::{Action, Environment},
    episode::HistoryEntry,
};

/// Everything a decision maker is shown before choosing an action.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub environment: &'a Environment,
    /// The rendered frame; image-based deciders should rely on this alone.
    pub image: &'a RgbImage,
    pub history: &'a [HistoryEntry],
    pub last_reward: f64,
    pub total_reward: f64,
}

/// Trait defining a decision maker driving the agent.
///
/// Implementations own whatever session or client state they need; the
/// caller creates the policy once and passes it to each episode.
pub trait Policy {
    fn name(&self) -> &str;

    /// Chooses the next action. `&mut self` lets the policy keep internal state across steps.
    fn choose(&mut self, observation: &Observation) -> Action;
}

/// A policy that picks uniformly among the six actions.
#[derive(Debug)]
pub struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn choose(&mut self, _observation: &Observation) -> Action {
        Action::ALL[self.rng.random_range(0..Action::ALL.len())]
    }
}

/// A policy that reads the state directly and carries each object to its bin.
///
/// When empty-handed it heads for the nearest object lying on the grid; when
/// holding it heads for the bin of the held color. It moves along rows
/// first, then columns, and issues PICK or DROP once on the target cell. With
/// nothing left to do, or when the matching bin shares its cell with an
/// earlier bin of another color, it returns `Stay`.
#[derive(Debug, Default)]
pub struct GreedyPolicy;

impl GreedyPolicy {
    pub fn new() -> Self {
        GreedyPolicy
    }

    fn target(environment: &Environment) -> Option<(Position, Action)> {
        let here = environment.agent();
        match environment.holding() {
            // A cell whose first bin has another color would reject the drop.
            Some(held) => environment
                .bins()
                .iter()
                .filter(|bin| bin.color == held.color)
                .find(|bin| {
                    environment.bin_at(bin.position).map(|first| first.color) == Some(held.color)
                })
                .map(|bin| (bin.position, Action::Drop)),
            None => environment
                .objects()
                .iter()
                .filter_map(|object| object.position())
                .min_by_key(|position| position.manhattan_distance(&here))
                .map(|position| (position, Action::Pick)),
        }
    }

    /// Converts a move towards `dst` into a single-cell action
    fn step_toward(src: Position, dst: Position) -> Action {
        if dst.row < src.row {
            Action::Up
        } else if dst.row > src.row {
            Action::Down
        } else if dst.col < src.col {
            Action::Left
        } else if dst.col > src.col {
            Action::Right
        } else {
            Action::Stay
        }
    }
}

impl Policy for GreedyPolicy {
    fn name(&self) -> &str {
        "greedy"
    }

    fn choose(&mut self, observation: &Observation) -> Action {
        let environment = observation.environment;
        let here = environment.agent();
        match Self::target(environment) {
            Some((target, interaction)) if target == here => interaction,
            Some((target, _)) => Self::step_toward(here, target),
            None => Action::Stay,
        }
    }
}
