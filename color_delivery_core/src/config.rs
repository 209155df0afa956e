use serde::{Deserialize, Serialize};

use crate::{Color, reward::RewardMode};

/// Largest grid edge accepted. Together with
/// [`MAX_CELL_SIZE`](crate::render::MAX_CELL_SIZE) it bounds every canvas.
pub const MAX_GRID_SIZE: usize = 128;

/// Represents errors raised while validating construction-time settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid size must be at least 1")]
    ZeroSize,
    #[error("Grid size {0} is too large (maximum {max})", max = MAX_GRID_SIZE)]
    GridTooLarge(usize),
    #[error("At least one color must be configured")]
    NoColors,
    #[error("Color '{0}' is configured more than once")]
    DuplicateColor(Color),
    #[error("Unknown color '{0}', expected one of red, green, blue, yellow")]
    UnknownColor(String),
    #[error(
        "Unknown reward mode '{0}', expected one of correct, pickup, any_delivery, move_object, step_alive"
    )]
    UnknownRewardMode(String),
    #[error("Cell size {0} is too small to draw on (minimum {min})", min = crate::render::MIN_CELL_SIZE)]
    CellTooSmall(u32),
    #[error("Cell size {0} is too large (maximum {max})", max = crate::render::MAX_CELL_SIZE)]
    CellTooLarge(u32),
    #[error("A {size}x{size} grid of {cell}px cells does not fit in an image")]
    CanvasTooLarge { size: usize, cell: u32 },
}

/// Construction-time settings of an environment. Not mutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Width and height of the square grid.
    pub size: usize,
    /// Colors in play; one object and one bin is created per entry, in this order.
    pub colors: Vec<Color>,
    /// Step budget after which an episode is truncated.
    pub max_steps: usize,
    pub reward_mode: RewardMode,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            size: 2,
            colors: vec![Color::Red],
            max_steps: 6,
            reward_mode: RewardMode::Correct,
        }
    }
}

impl EnvConfig {
    pub fn new(size: usize, colors: Vec<Color>, max_steps: usize, reward_mode: RewardMode) -> Self {
        EnvConfig {
            size,
            colors,
            max_steps,
            reward_mode,
        }
    }

    /// Builds a config from textual color and mode names, as typed on a command line.
    pub fn from_names<S: AsRef<str>>(
        size: usize,
        colors: &[S],
        max_steps: usize,
        reward_mode: &str,
    ) -> Result<Self, ConfigError> {
        let colors = colors
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<Color>, _>>()?;
        let config = EnvConfig::new(size, colors, max_steps, reward_mode.parse()?);
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants an environment relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if self.size > MAX_GRID_SIZE {
            return Err(ConfigError::GridTooLarge(self.size));
        }
        if self.colors.is_empty() {
            return Err(ConfigError::NoColors);
        }
        for (i, color) in self.colors.iter().enumerate() {
            if self.colors[..i].contains(color) {
                return Err(ConfigError::DuplicateColor(*color));
            }
        }
        Ok(())
    }
}
