use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod config;
pub mod environment;
pub mod episode;
pub mod layout;
pub mod policy;
pub mod render;
pub mod reward;

pub use config::{ConfigError, EnvConfig};
pub use environment::{Action, Bin, Environment, Object, ObjectState, Step};
pub use reward::RewardMode;

/// Represents a grid cell as `(row, col)`, row 0 being the top row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Self {
        Position { row, col }
    }

    /// Returns manhattan distance between two positions
    pub fn manhattan_distance(&self, other: &Position) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// The palette of object and bin colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
}

impl Color {
    pub const ALL: [Color; 4] = [Color::Red, Color::Green, Color::Blue, Color::Yellow];

    pub fn name(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Blue => "blue",
            Color::Yellow => "yellow",
        }
    }

    /// Single-letter code used by text layouts; objects are lowercase, bins uppercase.
    pub fn initial(self) -> char {
        match self {
            Color::Red => 'r',
            Color::Green => 'g',
            Color::Blue => 'b',
            Color::Yellow => 'y',
        }
    }

    pub fn from_initial(c: char) -> Option<Color> {
        Color::ALL
            .into_iter()
            .find(|color| color.initial() == c.to_ascii_lowercase())
    }

    /// Object marker color.
    pub fn rgb(self) -> [u8; 3] {
        match self {
            Color::Red => [255, 0, 0],
            Color::Green => [0, 255, 0],
            Color::Blue => [0, 0, 255],
            Color::Yellow => [255, 255, 0],
        }
    }

    /// Lightened variant used for bin backgrounds, e.g. red -> (255, 180, 180).
    pub fn bin_rgb(self) -> [u8; 3] {
        self.rgb().map(|c| 255 - ((255 - c as u16) * 75 / 255) as u8)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Color {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Color::ALL
            .into_iter()
            .find(|color| color.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownColor(wanted.to_string()))
    }
}
