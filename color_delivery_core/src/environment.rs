use std::{fmt, str::FromStr};

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    Color, Position,
    config::{ConfigError, EnvConfig},
    layout::{Layout, LayoutError},
    reward::{BinDrop, STEP_COST},
};

/// Represents actions the agent can take.
///
/// `Stay` is not part of the action space offered to decision makers; it is
/// what unrecognized tokens turn into, and it only pays the step cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
    Pick,
    Drop,
    Stay,
}

/// Error for a token outside the six-action space.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action '{0}', expected one of UP, DOWN, LEFT, RIGHT, PICK, DROP")]
pub struct UnknownAction(pub String);

impl Action {
    /// The action space offered to decision makers.
    pub const ALL: [Action; 6] = [
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::Pick,
        Action::Drop,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Action::Up => "UP",
            Action::Down => "DOWN",
            Action::Left => "LEFT",
            Action::Right => "RIGHT",
            Action::Pick => "PICK",
            Action::Drop => "DROP",
            Action::Stay => "STAY",
        }
    }

    /// Exact, case-sensitive conversion of a raw token. Anything that is not
    /// one of the six tokens, including `"up"` or `" UP"`, becomes `Stay`.
    pub fn from_token(token: &str) -> Action {
        Action::ALL
            .into_iter()
            .find(|action| action.token() == token)
            .unwrap_or(Action::Stay)
    }

    pub fn is_movement(self) -> bool {
        matches!(self, Action::Up | Action::Down | Action::Left | Action::Right)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Forgiving parse for typed input: surrounding whitespace and case are ignored.
impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Action::ALL
            .into_iter()
            .find(|action| action.token().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownAction(wanted.to_string()))
    }
}

/// Lifecycle of an object within an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectState {
    /// Lying on the floor; can be picked up and is drawn.
    OnGrid(Position),
    /// Carried by the agent.
    Held,
    /// In its matching bin. Terminal.
    Delivered,
    /// Dropped into a bin under `any_delivery`: off the grid but never delivered.
    Vanished,
}

/// A colored object that has to be carried to the bin of the same color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub color: Color,
    state: ObjectState,
}

impl Object {
    pub(crate) fn new(color: Color, position: Position) -> Self {
        Object {
            color,
            state: ObjectState::OnGrid(position),
        }
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    /// Grid cell of the object, if it is lying on the floor.
    pub fn position(&self) -> Option<Position> {
        match self.state {
            ObjectState::OnGrid(position) => Some(position),
            _ => None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.state == ObjectState::Delivered
    }

    pub fn is_held(&self) -> bool {
        self.state == ObjectState::Held
    }
}

/// A bin accepting objects. Bins never move and are never consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    pub color: Color,
    pub position: Position,
}

/// Outcome of a single transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub reward: f64,
    /// True once every object is delivered or the step budget is spent.
    /// The two causes are deliberately not distinguished here.
    pub done: bool,
}

/// The color delivery world.
///
/// One agent moves on a square grid holding at most one object at a time.
/// There is one object and one bin per configured color, listed in
/// configuration order; that order breaks ties when several objects or bins
/// share a cell.
#[derive(Debug, Clone)]
pub struct Environment {
    config: EnvConfig,
    steps: usize,
    agent: Position,
    objects: Vec<Object>,
    bins: Vec<Bin>,
    /// Index into `objects` of the carried object.
    holding: Option<usize>,
    rng: StdRng,
}

impl Environment {
    /// Creates an environment seeded from the operating system and resets it.
    pub fn new(config: EnvConfig) -> Result<Self, ConfigError> {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Creates a reproducible environment: same seed, same placements.
    pub fn with_seed(config: EnvConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: EnvConfig, rng: StdRng) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut environment = Environment {
            config,
            steps: 0,
            agent: Position::new(0, 0),
            objects: Vec::new(),
            bins: Vec::new(),
            holding: None,
            rng,
        };
        environment.reset();
        Ok(environment)
    }

    /// Creates an environment whose first episode starts from a fixed placement.
    ///
    /// Later calls to [`Environment::reset`] randomize placements as usual.
    pub fn with_layout(config: EnvConfig, layout: &Layout) -> Result<Self, LayoutError> {
        config.validate()?;
        if layout.size != config.size {
            return Err(LayoutError::SizeMismatch {
                expected: config.size,
                found: layout.size,
            });
        }

        let mut objects = Vec::with_capacity(config.colors.len());
        let mut bins = Vec::with_capacity(config.colors.len());
        for &color in &config.colors {
            let object_position = layout
                .object(color)
                .ok_or(LayoutError::MissingObject(color))?;
            let bin_position = layout.bin(color).ok_or(LayoutError::MissingBin(color))?;
            objects.push(Object::new(color, object_position));
            bins.push(Bin {
                color,
                position: bin_position,
            });
        }
        if let Some(&(color, _)) = layout
            .objects
            .iter()
            .chain(&layout.bins)
            .find(|(color, _)| !config.colors.contains(color))
        {
            return Err(LayoutError::UnconfiguredColor(color));
        }

        Ok(Environment {
            config,
            steps: 0,
            agent: layout.agent,
            objects,
            bins,
            holding: None,
            rng: StdRng::from_os_rng(),
        })
    }

    /// Replaces the placement generator, making subsequent resets reproducible.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Starts a new episode with uniformly random, possibly overlapping, placements.
    pub fn reset(&mut self) {
        self.steps = 0;
        self.holding = None;
        self.agent = self.random_position();

        let colors = self.config.colors.clone();
        let objects: Vec<Object> = colors
            .iter()
            .map(|&color| Object::new(color, self.random_position()))
            .collect();
        let bins: Vec<Bin> = colors
            .iter()
            .map(|&color| Bin {
                color,
                position: self.random_position(),
            })
            .collect();
        self.objects = objects;
        self.bins = bins;

        debug!(
            agent = %self.agent,
            objects = ?self.objects,
            bins = ?self.bins,
            "environment reset"
        );
    }

    /// Advances the world by one action.
    pub fn step(&mut self, action: Action) -> Step {
        self.steps += 1;
        let mode = self.config.reward_mode;

        let mut reward = -STEP_COST;

        self.agent = self.moved(self.agent, action);

        if action == Action::Pick {
            let was_empty_handed = self.holding.is_none();
            self.pick_up();
            reward += mode.pickup_reward(was_empty_handed && self.holding.is_some());
        }

        if action == Action::Drop {
            reward += self.drop_held();
        }

        reward += mode.step_bonus(action, self.holding.is_some());

        let done = self.all_delivered() || self.is_truncated();
        trace!(
            step = self.steps,
            %action,
            agent = %self.agent,
            reward,
            done,
            "step"
        );
        Step { reward, done }
    }

    /// Form of [`Environment::step`] for raw tokens; see [`Action::from_token`].
    pub fn step_token(&mut self, token: &str) -> Step {
        self.step(Action::from_token(token))
    }

    /// Position after a move, clamped to the grid.
    fn moved(&self, from: Position, action: Action) -> Position {
        let last = self.config.size - 1;
        let Position { row, col } = from;
        match action {
            Action::Up => Position::new(row.saturating_sub(1), col),
            Action::Down => Position::new((row + 1).min(last), col),
            Action::Left => Position::new(row, col.saturating_sub(1)),
            Action::Right => Position::new(row, (col + 1).min(last)),
            Action::Pick | Action::Drop | Action::Stay => from,
        }
    }

    /// Picks up the first undelivered object lying under the agent, if hands are free.
    fn pick_up(&mut self) {
        if self.holding.is_some() {
            return;
        }
        let agent = self.agent;
        if let Some(index) = self
            .objects
            .iter()
            .position(|object| object.position() == Some(agent))
        {
            self.objects[index].state = ObjectState::Held;
            self.holding = Some(index);
            debug!(color = %self.objects[index].color, at = %agent, "picked up object");
        }
    }

    /// Drops the held object and returns the drop reward.
    fn drop_held(&mut self) -> f64 {
        let Some(index) = self.holding else {
            return 0.0;
        };
        let agent = self.agent;
        let color = self.objects[index].color;

        let bin_drop = self
            .bins
            .iter()
            .find(|bin| bin.position == agent)
            .and_then(|bin| self.config.reward_mode.bin_drop(bin.color == color));

        self.holding = None;
        let (state, reward) = match bin_drop {
            Some(BinDrop::Deliver) => (ObjectState::Delivered, BinDrop::Deliver.reward()),
            Some(BinDrop::Reject) => (ObjectState::OnGrid(agent), BinDrop::Reject.reward()),
            Some(BinDrop::Vanish) => (ObjectState::Vanished, BinDrop::Vanish.reward()),
            None => (ObjectState::OnGrid(agent), 0.0),
        };
        self.objects[index].state = state;
        debug!(%color, at = %agent, outcome = ?bin_drop, reward, "dropped object");
        reward
    }

    fn random_position(&mut self) -> Position {
        let size = self.config.size;
        let row = self.rng.random_range(0..size);
        let col = self.rng.random_range(0..size);
        Position::new(row, col)
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }
    pub fn size(&self) -> usize {
        self.config.size
    }
    pub fn steps(&self) -> usize {
        self.steps
    }
    pub fn agent(&self) -> Position {
        self.agent
    }
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    /// The carried object, if any.
    pub fn holding(&self) -> Option<&Object> {
        self.holding.map(|index| &self.objects[index])
    }

    /// Index into [`Environment::objects`] of the carried object.
    pub fn holding_index(&self) -> Option<usize> {
        self.holding
    }

    /// Success condition of an episode.
    pub fn all_delivered(&self) -> bool {
        self.objects.iter().all(Object::is_delivered)
    }

    pub fn is_truncated(&self) -> bool {
        self.steps >= self.config.max_steps
    }

    /// First bin on a cell, the one a drop there would use.
    pub fn bin_at(&self, position: Position) -> Option<&Bin> {
        self.bins.iter().find(|bin| bin.position == position)
    }

    /// First object lying on a cell, the one a pickup there would take.
    pub fn object_at(&self, position: Position) -> Option<&Object> {
        self.objects
            .iter()
            .find(|object| object.position() == Some(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reward::RewardMode;

    fn layout_env(map: &str, colors: Vec<Color>, mode: RewardMode) -> Environment {
        let layout: Layout = map.parse().unwrap();
        let config = EnvConfig::new(layout.size, colors, 50, mode);
        Environment::with_layout(config, &layout).unwrap()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn tokens_parse_strictly_and_leniently() {
        assert_eq!("pick".parse::<Action>(), Ok(Action::Pick));
        assert_eq!(
            "JUMP".parse::<Action>(),
            Err(UnknownAction("JUMP".to_string()))
        );
        assert_eq!("STAY".parse::<Action>(), Err(UnknownAction("STAY".to_string())));
        assert_eq!(" down ".parse::<Action>(), Ok(Action::Down));
        assert_eq!(Action::from_token("DOWN"), Action::Down);
        assert_eq!(Action::from_token("JUMP"), Action::Stay);
        assert_eq!(Action::from_token(" DOWN "), Action::Stay);
        assert_eq!(Action::from_token("right"), Action::Stay);
        assert_eq!(Action::from_token("STAY"), Action::Stay);
    }

    #[test]
    fn movement_is_clamped_to_the_grid() {
        let mut env = layout_env("@ .\nr R", vec![Color::Red], RewardMode::Correct);

        let step = env.step(Action::Up);
        assert_eq!(env.agent(), Position::new(0, 0));
        assert_close(step.reward, -0.1);

        env.step(Action::Left);
        assert_eq!(env.agent(), Position::new(0, 0));

        env.step(Action::Right);
        env.step(Action::Right);
        assert_eq!(env.agent(), Position::new(0, 1));

        env.step(Action::Down);
        env.step(Action::Down);
        assert_eq!(env.agent(), Position::new(1, 1));
        assert_eq!(env.steps(), 6);
    }

    #[test]
    fn unknown_tokens_only_cost_a_step() {
        let mut env = layout_env("@r R\n. .", vec![Color::Red], RewardMode::Correct);
        let step = env.step_token("DANCE");
        assert_close(step.reward, -0.1);
        assert!(!step.done);
        assert_eq!(env.agent(), Position::new(0, 0));
        assert!(env.holding().is_none());
        assert_eq!(env.steps(), 1);
    }

    #[test]
    fn raw_tokens_must_match_exactly() {
        let mut env = layout_env("@r R\n. .", vec![Color::Red], RewardMode::Correct);
        for token in ["right", " DOWN ", "Down", "pick", "RIGHT\n"] {
            let step = env.step_token(token);
            assert_close(step.reward, -0.1);
            assert_eq!(env.agent(), Position::new(0, 0), "{token:?}");
        }
        assert!(env.holding().is_none());

        env.step_token("RIGHT");
        assert_eq!(env.agent(), Position::new(0, 1));
    }

    #[test]
    fn pickup_takes_the_first_object_in_color_order() {
        let mut env = layout_env(
            "@rb R\n. B",
            vec![Color::Blue, Color::Red],
            RewardMode::Correct,
        );
        env.step(Action::Pick);
        assert_eq!(env.holding().map(|o| o.color), Some(Color::Blue));
        assert_eq!(env.holding_index(), Some(0));
        assert_eq!(env.objects()[0].position(), None);

        // Hands are full: the red object stays put.
        env.step(Action::Pick);
        assert_eq!(env.holding().map(|o| o.color), Some(Color::Blue));
        assert_eq!(env.objects()[1].position(), Some(Position::new(0, 0)));
    }

    #[test]
    fn drop_off_bin_puts_object_back_on_the_floor() {
        let mut env = layout_env("@r .\n. R", vec![Color::Red], RewardMode::Correct);
        env.step(Action::Pick);
        env.step(Action::Right);
        let step = env.step(Action::Drop);
        assert_close(step.reward, -0.1);
        assert!(env.holding().is_none());
        assert_eq!(
            env.objects()[0].state(),
            ObjectState::OnGrid(Position::new(0, 1))
        );

        // It can be picked up again.
        env.step(Action::Pick);
        assert!(env.objects()[0].is_held());
    }

    #[test]
    fn drop_with_empty_hands_does_nothing() {
        let mut env = layout_env("@R r\n. .", vec![Color::Red], RewardMode::Correct);
        let step = env.step(Action::Drop);
        assert_close(step.reward, -0.1);
        assert_eq!(
            env.objects()[0].state(),
            ObjectState::OnGrid(Position::new(0, 1))
        );
    }

    #[test]
    fn modes_without_bin_rules_drop_on_the_floor() {
        for mode in [RewardMode::Pickup, RewardMode::MoveObject, RewardMode::StepAlive] {
            let mut env = layout_env("@rR .\n. .", vec![Color::Red], mode);
            env.step(Action::Pick);
            env.step(Action::Drop);
            assert_eq!(
                env.objects()[0].state(),
                ObjectState::OnGrid(Position::new(0, 0)),
                "{mode}"
            );
            assert!(!env.all_delivered());
        }
    }

    #[test]
    fn pickup_mode_pays_only_for_successful_pickups() {
        let mut env = layout_env("@r R\n. .", vec![Color::Red], RewardMode::Pickup);
        assert_close(env.step(Action::Pick).reward, 0.9);
        assert_close(env.step(Action::Pick).reward, -0.1);
        env.step(Action::Drop);
        env.step(Action::Right);
        assert_close(env.step(Action::Pick).reward, -0.1);
    }

    #[test]
    fn move_object_pays_for_carrying() {
        let mut env = layout_env("@r R\n. .", vec![Color::Red], RewardMode::MoveObject);
        assert_close(env.step(Action::Down).reward, -0.1);
        env.step(Action::Up);
        env.step(Action::Pick);
        // Bumping into the wall still counts as a move while carrying.
        assert_close(env.step(Action::Up).reward, 4.9);
        assert_close(env.step(Action::Right).reward, 4.9);
        // Dropping happens before the bonus is evaluated.
        assert_close(env.step(Action::Drop).reward, -0.1);
        assert_close(env.step(Action::Left).reward, -0.1);
    }

    #[test]
    fn same_seed_same_placement() {
        let config = EnvConfig::new(5, vec![Color::Red, Color::Blue], 10, RewardMode::Correct);
        let a = Environment::with_seed(config.clone(), 7).unwrap();
        let b = Environment::with_seed(config, 7).unwrap();
        assert_eq!(a.agent(), b.agent());
        assert_eq!(a.objects(), b.objects());
        assert_eq!(a.bins(), b.bins());
    }

    #[test]
    fn reset_restores_a_fresh_episode() {
        let config = EnvConfig::new(3, vec![Color::Red, Color::Green], 10, RewardMode::Correct);
        let mut env = Environment::with_seed(config, 3).unwrap();
        for action in [Action::Pick, Action::Down, Action::Drop, Action::Right] {
            env.step(action);
        }
        env.reset();
        assert_eq!(env.steps(), 0);
        assert!(env.holding().is_none());
        assert_eq!(env.objects().len(), 2);
        assert_eq!(env.bins().len(), 2);
        assert!(env.objects().iter().all(|o| o.position().is_some()));
        assert_eq!(env.objects()[0].color, Color::Red);
        assert_eq!(env.bins()[1].color, Color::Green);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = EnvConfig::new(0, vec![Color::Red], 10, RewardMode::Correct);
        assert_eq!(
            Environment::with_seed(config, 1).unwrap_err(),
            ConfigError::ZeroSize
        );
    }

    #[test]
    fn layout_must_match_config() {
        let layout: Layout = "@r R\n. .".parse().unwrap();
        let wrong_size = EnvConfig::new(3, vec![Color::Red], 5, RewardMode::Correct);
        assert_eq!(
            Environment::with_layout(wrong_size, &layout).unwrap_err(),
            LayoutError::SizeMismatch {
                expected: 3,
                found: 2
            }
        );

        let missing = EnvConfig::new(2, vec![Color::Red, Color::Blue], 5, RewardMode::Correct);
        assert_eq!(
            Environment::with_layout(missing, &layout).unwrap_err(),
            LayoutError::MissingObject(Color::Blue)
        );

        let layout: Layout = "@r R\nb B".parse().unwrap();
        let extra = EnvConfig::new(2, vec![Color::Red], 5, RewardMode::Correct);
        assert_eq!(
            Environment::with_layout(extra, &layout).unwrap_err(),
            LayoutError::UnconfiguredColor(Color::Blue)
        );
    }
}
