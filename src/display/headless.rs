use crate::prelude::*;
use super::{Frame, BLANK, HEIGHT, WIDTH};

/// Matrix for machines without the LED board; frames go to the debug log.
#[derive(Debug)]
pub struct LogMatrix {
    last: Frame,
    frames: u64,
}

impl Default for LogMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl LogMatrix {
    pub fn new() -> Self {
        Self {
            last: BLANK,
            frames: 0,
        }
    }

    pub fn last(&self) -> &Frame {
        &self.last
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn render(frame: &Frame) -> String {
        frame
            .chunks(WIDTH)
            .take(HEIGHT)
            .map(|row| row.iter().map(|p| if p.is_lit() { '#' } else { '.' }).collect::<String>())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl LedMatrix for LogMatrix {
    fn set_pixels(&mut self, frame: &Frame) -> Result<()> {
        // animations push dozens of identical frames
        if *frame != self.last {
            debug!("matrix {}", Self::render(frame));
        }
        self.last = *frame;
        self.frames += 1;
        Ok(())
    }
}
