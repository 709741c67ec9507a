use crate::prelude::*;
use crate::level::MAX_LEVEL;
use super::{font, index, Frame, BLANK, HEIGHT, WIDTH};
use std::time::Duration;

const FONT_TOP: usize = 1;
const SOLAR_COLUMNS: std::ops::Range<usize> = 0..4;

/// Inputs of the two-bar light wave: solar on the left, grid on the right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Wave {
    pub solar_level: u8,
    pub grid_level: u8,
    pub solar_color: Rgb,
    /// Grid bar is blue when importing or idle, red when exporting.
    pub grid_positive: bool,
}

pub struct Renderer<M> {
    matrix: M,
    scroll_speed: Duration,
    wave_speed: Duration,
    wave_cycles: u32,
    max_animation: Duration,
}

impl<M: LedMatrix> Renderer<M> {
    pub fn new(matrix: M, display: &config::Display) -> Self {
        Self {
            matrix,
            scroll_speed: display.scroll_speed(),
            wave_speed: display.wave_speed(),
            wave_cycles: display.wave_cycles(),
            max_animation: display.max_animation(),
        }
    }

    pub fn matrix(&self) -> &M {
        &self.matrix
    }

    pub fn clear(&mut self) -> Result<()> {
        self.matrix.clear()
    }

    /// Scrolls `text` right to left, ending on a blank matrix.
    pub async fn show_message(&mut self, text: &str, color: Rgb) -> Result<()> {
        debug!("message {:?}", text);

        let mut strip = vec![0u8; WIDTH];
        strip.extend(font::columns(text));
        strip.extend(std::iter::repeat(0).take(WIDTH));

        for window in strip.windows(WIDTH) {
            let mut frame = BLANK;
            for (x, column) in window.iter().enumerate() {
                for y in 0..font::GLYPH_HEIGHT {
                    if column & (1 << y) != 0 {
                        frame[index(x, y + FONT_TOP)] = color;
                    }
                }
            }
            self.matrix.set_pixels(&frame)?;
            pause(self.scroll_speed).await;
        }

        Ok(())
    }

    /// One column per level, bottom-aligned, shaded from blue (low) to yellow (full).
    pub fn bar_chart(&mut self, levels: &[u8]) -> Result<()> {
        self.matrix.set_pixels(&bar_frame(levels))
    }

    /// Animates the two bars. The run is capped at `max_animation` and always
    /// shows at least one frame.
    pub async fn light_wave(&mut self, wave: &Wave) -> Result<()> {
        let (frames, frame_time) = self.wave_plan(wave);
        trace!("light wave {:?}: {} frames of {:?}", wave, frames, frame_time);

        for i in 0..frames {
            self.matrix.set_pixels(&wave_frame(wave, (i % WIDTH) as u32))?;
            pause(frame_time).await;
        }

        Ok(())
    }

    pub fn wave_plan(&self, wave: &Wave) -> (usize, Duration) {
        let ratio = level_ratio(wave.solar_level);
        let frame_time = self.wave_speed.mul_f64(1.0 - 0.7 * ratio);
        let cycles = self.wave_cycles as usize + (20.0 * ratio) as usize;
        let wanted = cycles * WIDTH;

        let budget = if frame_time.is_zero() {
            wanted
        } else {
            (self.max_animation.as_secs_f64() / frame_time.as_secs_f64()) as usize
        };

        (wanted.min(budget).max(1), frame_time)
    }
}

// no borrow of the renderer may live across this await
async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

fn level_ratio(level: u8) -> f64 {
    (level as f64 / MAX_LEVEL as f64).max(0.1)
}

pub fn bar_frame(levels: &[u8]) -> Frame {
    let mut frame = BLANK;

    for (x, level) in levels.iter().take(WIDTH).enumerate() {
        let level = (*level).min(MAX_LEVEL) as usize;
        let ratio = level as f64 / MAX_LEVEL as f64;
        let shade = Rgb((255.0 * ratio) as u8, (255.0 * ratio) as u8, (255.0 * (1.0 - ratio)) as u8);

        for y in HEIGHT - level..HEIGHT {
            frame[index(x, y)] = shade;
        }
    }

    frame
}

/// Frame `shift` (0..8) of the light wave.
pub fn wave_frame(wave: &Wave, shift: u32) -> Frame {
    let solar_ratio = level_ratio(wave.solar_level);
    let grid_ratio = level_ratio(wave.grid_level);
    let min_brightness = 0.4 - 0.2 * solar_ratio;
    let pulse = min_brightness + (1.0 - min_brightness) * ((shift as f64 - 3.5) / 3.5).abs();

    let mut frame = BLANK;
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let solar = SOLAR_COLUMNS.contains(&x);
            let level = (if solar { wave.solar_level } else { wave.grid_level }).min(MAX_LEVEL) as usize;
            if level == 0 || y < HEIGHT - level {
                continue;
            }

            let position = (y - (HEIGHT - level)) as f64 / level as f64;
            frame[index(x, y)] = if solar {
                solar_pixel(wave.solar_color, solar_ratio, pulse.powf(1.0 - 0.5 * solar_ratio), position)
            } else {
                let w = pulse.powf(1.0 - 0.5 * grid_ratio);
                if wave.grid_positive {
                    Rgb(0, 0, (255.0 * w) as u8)
                } else {
                    Rgb((255.0 * w) as u8, 0, 0)
                }
            };
        }
    }

    frame
}

// low output reads warm, high output picks up a blue tint towards the bottom
fn solar_pixel(color: Rgb, ratio: f64, w: f64, position: f64) -> Rgb {
    let (r, g, b) = (color.0 as f64, color.1 as f64, color.2 as f64);

    if ratio < 0.3 {
        Rgb((r * w) as u8, (g * 0.7 * w * position) as u8, (b * w * 0.1) as u8)
    } else if ratio < 0.6 {
        Rgb((r * w * (1.0 - position * 0.5)) as u8, (g * w) as u8, (b * w * 0.2) as u8)
    } else {
        Rgb((r * w * 0.3) as u8, (g * w) as u8, ((b + 100.0) * w * position) as u8)
    }
}
