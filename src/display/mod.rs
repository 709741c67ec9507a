pub mod font;
pub mod headless;
pub mod renderer;
pub mod sense_hat;

use crate::prelude::*;
use enum_dispatch::*;

pub use headless::LogMatrix;
pub use renderer::{Renderer, Wave};
pub use sense_hat::SenseHat;

pub const WIDTH: usize = 8;
pub const HEIGHT: usize = 8;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const RED: Rgb = Rgb(255, 0, 0);
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const BLUE: Rgb = Rgb(0, 0, 255);

    pub fn is_lit(&self) -> bool {
        *self != Self::BLACK
    }
}

/// Row-major pixels, top-left first.
pub type Frame = [Rgb; WIDTH * HEIGHT];

pub const BLANK: Frame = [Rgb::BLACK; WIDTH * HEIGHT];

pub fn index(x: usize, y: usize) -> usize {
    y * WIDTH + x
}

/// Write-only 8x8 pixel sink.
#[enum_dispatch]
pub trait LedMatrix {
    fn set_pixels(&mut self, frame: &Frame) -> Result<()>;

    fn clear(&mut self) -> Result<()> {
        self.set_pixels(&BLANK)
    }
}

#[enum_dispatch(LedMatrix)]
#[derive(Debug)]
pub enum Matrix {
    SenseHat(SenseHat),
    LogMatrix(LogMatrix),
}

impl Matrix {
    pub fn from_config(display: &config::Display) -> Result<Self> {
        match display.device() {
            config::DisplayDevice::SenseHat => {
                let matrix = match display.framebuffer() {
                    Some(path) => SenseHat::open(path, display.rotation())?,
                    None => SenseHat::discover(display.rotation())?,
                };
                Ok(Matrix::SenseHat(matrix))
            }
            config::DisplayDevice::Log => Ok(Matrix::LogMatrix(LogMatrix::new())),
        }
    }
}
