//! Raster observation of the world.
//!
//! Layers are painted in a fixed order, later layers covering earlier ones:
//! bin backgrounds, object triangles, grid lines, then the agent.

use std::{io::Cursor, path::Path};

use image::{ImageFormat, Rgb, RgbImage};

use crate::{
    Position,
    config::{ConfigError, MAX_GRID_SIZE},
    environment::Environment,
};

/// Smallest cell edge, in pixels, that still leaves room for every layer.
pub const MIN_CELL_SIZE: u32 = 4;

/// Largest cell edge accepted; with [`MAX_GRID_SIZE`] the canvas stays below 16384 px.
pub const MAX_CELL_SIZE: u32 = 128;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AGENT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Represents errors raised while writing rendered frames.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to encode frame: {0}")]
    Image(#[from] image::ImageError),
}

/// Draws an [`Environment`] into an RGB image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renderer {
    cell: u32,
    grid_thickness: u32,
    grid_color: Rgb<u8>,
}

impl Default for Renderer {
    fn default() -> Self {
        Renderer {
            cell: 64,
            grid_thickness: 2,
            grid_color: Rgb([0, 0, 0]),
        }
    }
}

impl Renderer {
    pub fn new(cell: u32, grid_thickness: u32) -> Result<Self, ConfigError> {
        if cell < MIN_CELL_SIZE {
            return Err(ConfigError::CellTooSmall(cell));
        }
        if cell > MAX_CELL_SIZE {
            return Err(ConfigError::CellTooLarge(cell));
        }
        Ok(Renderer {
            cell,
            grid_thickness,
            ..Renderer::default()
        })
    }

    pub fn with_grid_color(mut self, rgb: [u8; 3]) -> Self {
        self.grid_color = Rgb(rgb);
        self
    }

    pub fn cell(&self) -> u32 {
        self.cell
    }

    /// Edge length in pixels of the image for a grid of `size` cells.
    pub fn canvas_side(&self, size: usize) -> Result<u32, ConfigError> {
        u32::try_from(size)
            .ok()
            .and_then(|size| size.checked_mul(self.cell))
            .ok_or(ConfigError::CanvasTooLarge {
                size,
                cell: self.cell,
            })
    }

    /// Renders the current state. The same state always yields the same pixels.
    pub fn render(&self, environment: &Environment) -> RgbImage {
        // Grid size and cell size are both bounded at construction.
        let side = environment.size() as u32 * self.cell;
        let mut img = RgbImage::from_pixel(side, side, BACKGROUND);

        for bin in environment.bins() {
            self.fill_cell(&mut img, bin.position, Rgb(bin.color.bin_rgb()));
        }

        // Held, delivered and vanished objects have no position and are not drawn.
        for object in environment.objects() {
            if let Some(position) = object.position() {
                self.fill_triangle(&mut img, position, Rgb(object.color.rgb()));
            }
        }

        self.draw_grid(&mut img, environment.size());
        self.fill_circle(&mut img, environment.agent(), AGENT_COLOR);

        img
    }

    /// Pixel center of a cell as `(y, x)`.
    fn center(&self, position: Position) -> (i64, i64) {
        let cell = self.cell as i64;
        (
            position.row as i64 * cell + cell / 2,
            position.col as i64 * cell + cell / 2,
        )
    }

    fn fill_cell(&self, img: &mut RgbImage, position: Position, color: Rgb<u8>) {
        let y0 = position.row as u32 * self.cell;
        let x0 = position.col as u32 * self.cell;
        for y in y0..y0 + self.cell {
            for x in x0..x0 + self.cell {
                img.put_pixel(x, y, color);
            }
        }
    }

    /// Upright triangle centered in the cell, filled by a barycentric area test.
    fn fill_triangle(&self, img: &mut RgbImage, position: Position, color: Rgb<u8>) {
        let (cy, cx) = self.center(position);
        let half = self.cell as i64 / 3;
        let (height, width) = (img.height() as i64, img.width() as i64);

        let top = (cy - half, cx);
        let left = (cy + half, cx - half);
        let right = (cy + half, cx + half);
        let full = area(top, left, right);

        for y in (cy - half).max(0)..(cy + half).min(height) {
            for x in (cx - half).max(0)..(cx + half).min(width) {
                let p = (y, x);
                if area(p, left, right) + area(top, p, right) + area(top, left, p) <= full {
                    img.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }

    fn draw_grid(&self, img: &mut RgbImage, size: usize) {
        let side = img.width();
        let color = self.grid_color;
        let mut fill_band = |from: u32, to: u32, horizontal: bool| {
            for a in from..to.min(side) {
                for b in 0..side {
                    if horizontal {
                        img.put_pixel(b, a, color);
                    } else {
                        img.put_pixel(a, b, color);
                    }
                }
            }
        };

        for i in 0..=size as u32 {
            let start = i * self.cell;
            fill_band(start, start.saturating_add(self.grid_thickness), true);
            fill_band(start, start.saturating_add(self.grid_thickness), false);
        }

        let border = self.grid_thickness * 2;
        for horizontal in [true, false] {
            fill_band(0, border, horizontal);
            fill_band(side.saturating_sub(border), side, horizontal);
        }
    }

    fn fill_circle(&self, img: &mut RgbImage, position: Position, color: Rgb<u8>) {
        let (cy, cx) = self.center(position);
        let radius = self.cell as i64 / 4;
        let (height, width) = (img.height() as i64, img.width() as i64);

        for y in (cy - radius).max(0)..=(cy + radius).min(height - 1) {
            for x in (cx - radius).max(0)..=(cx + radius).min(width - 1) {
                let (dy, dx) = (y - cy, x - cx);
                if dx * dx + dy * dy <= radius * radius {
                    img.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }
}

/// Twice the area of the triangle `abc`, points given as `(y, x)`.
fn area(a: (i64, i64), b: (i64, i64), c: (i64, i64)) -> i64 {
    ((b.1 - a.1) * (c.0 - a.0) - (c.1 - a.1) * (b.0 - a.0)).abs()
}

/// Renders with the default 64 pixel cells.
pub fn render(environment: &Environment) -> RgbImage {
    Renderer::default().render(environment)
}

/// Encodes a frame as PNG bytes.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, RenderError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Writes a frame to a PNG file.
pub fn save_png(img: &RgbImage, path: impl AsRef<Path>) -> Result<(), RenderError> {
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
