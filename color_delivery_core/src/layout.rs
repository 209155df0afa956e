use std::{fmt, str::FromStr};

use crate::{Color, Position, config::ConfigError, environment::Environment};

/// Represents errors that can occur while reading or applying a layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("Layout is empty")]
    Empty,
    #[error("Layout is not square: row {row} has {found} cells, expected {expected}")]
    NotSquare {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Unknown layout code '{token}' at ({row}, {col})")]
    UnknownToken {
        token: String,
        row: usize,
        col: usize,
    },
    #[error("Multiple agents ('@') found")]
    MultipleAgents,
    #[error("No agent ('@') found in layout")]
    NoAgent,
    #[error("More than one {0} object in layout")]
    DuplicateObject(Color),
    #[error("More than one {0} bin in layout")]
    DuplicateBin(Color),
    #[error("Layout has no {0} object")]
    MissingObject(Color),
    #[error("Layout has no {0} bin")]
    MissingBin(Color),
    #[error("Layout contains {0} entities but {0} is not a configured color")]
    UnconfiguredColor(Color),
    #[error("Layout is {found}x{found} but the grid size is {expected}")]
    SizeMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A fixed placement of the agent, objects and bins.
///
/// The text form has one line per row and one whitespace-separated token per
/// cell. A token is `.` for an empty cell, or any combination of `@` (the
/// agent), a lowercase color initial (an object) and an uppercase color
/// initial (a bin):
///
/// ```text
/// @r  .
/// .   R
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub size: usize,
    pub agent: Position,
    pub objects: Vec<(Color, Position)>,
    pub bins: Vec<(Color, Position)>,
}

impl Layout {
    pub fn object(&self, color: Color) -> Option<Position> {
        lookup(&self.objects, color)
    }

    pub fn bin(&self, color: Color) -> Option<Position> {
        lookup(&self.bins, color)
    }

    /// Snapshot of the entities currently on the grid.
    ///
    /// Held, delivered and vanished objects have no cell and are left out, so
    /// a mid-episode capture may not load back under the same configuration.
    pub fn capture(environment: &Environment) -> Self {
        Layout {
            size: environment.size(),
            agent: environment.agent(),
            objects: environment
                .objects()
                .iter()
                .filter_map(|object| object.position().map(|p| (object.color, p)))
                .collect(),
            bins: environment
                .bins()
                .iter()
                .map(|bin| (bin.color, bin.position))
                .collect(),
        }
    }

    /// Layout code of a single cell.
    fn token(&self, position: Position) -> String {
        let mut token = String::new();
        if self.agent == position {
            token.push('@');
        }
        for (color, _) in self.objects.iter().filter(|(_, p)| *p == position) {
            token.push(color.initial());
        }
        for (color, _) in self.bins.iter().filter(|(_, p)| *p == position) {
            token.push(color.initial().to_ascii_uppercase());
        }
        if token.is_empty() {
            token.push('.');
        }
        token
    }
}

fn lookup(entries: &[(Color, Position)], color: Color) -> Option<Position> {
    entries
        .iter()
        .find(|(c, _)| *c == color)
        .map(|(_, position)| *position)
}

impl FromStr for Layout {
    type Err = LayoutError;

    fn from_str(map_string: &str) -> Result<Self, Self::Err> {
        let lines: Vec<&str> = map_string
            .trim()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            return Err(LayoutError::Empty);
        }

        let size = lines.len();
        let mut agent: Option<Position> = None;
        let mut objects: Vec<(Color, Position)> = Vec::new();
        let mut bins: Vec<(Color, Position)> = Vec::new();

        for (row, line) in lines.iter().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() != size {
                return Err(LayoutError::NotSquare {
                    row,
                    expected: size,
                    found: tokens.len(),
                });
            }

            for (col, token) in tokens.iter().enumerate() {
                let pos = Position { row, col };
                if *token == "." {
                    continue;
                }
                for code in token.chars() {
                    match code {
                        '@' => {
                            if agent.is_some() {
                                return Err(LayoutError::MultipleAgents);
                            }
                            agent = Some(pos);
                        }
                        code => match Color::from_initial(code) {
                            Some(color) if code.is_ascii_lowercase() => {
                                if lookup(&objects, color).is_some() {
                                    return Err(LayoutError::DuplicateObject(color));
                                }
                                objects.push((color, pos));
                            }
                            Some(color) => {
                                if lookup(&bins, color).is_some() {
                                    return Err(LayoutError::DuplicateBin(color));
                                }
                                bins.push((color, pos));
                            }
                            None => {
                                return Err(LayoutError::UnknownToken {
                                    token: token.to_string(),
                                    row,
                                    col,
                                });
                            }
                        },
                    }
                }
            }
        }

        let agent = agent.ok_or(LayoutError::NoAgent)?;

        Ok(Layout {
            size,
            agent,
            objects,
            bins,
        })
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<Vec<String>> = (0..self.size)
            .map(|row| {
                (0..self.size)
                    .map(|col| self.token(Position { row, col }))
                    .collect()
            })
            .collect();
        let width = rows.iter().flatten().map(String::len).max().unwrap_or(1);
        for tokens in &rows {
            let cells: Vec<String> = tokens.iter().map(|t| format!("{t:<width$}")).collect();
            writeln!(f, "{}", cells.join(" ").trim_end())?;
        }
        Ok(())
    }
}
