use crate::prelude::*;
use super::{index, Frame, HEIGHT, WIDTH};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const FB_NAME: &str = "RPi-Sense FB";
const GRAPHICS_DIR: &str = "/sys/class/graphics";

/// Raspberry Pi Sense HAT LED matrix through its RGB565 framebuffer.
#[derive(Debug)]
pub struct SenseHat {
    path: PathBuf,
    file: File,
    rotation: u16,
}

impl SenseHat {
    pub fn open(path: impl AsRef<Path>, rotation: u16) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !matches!(rotation, 0 | 90 | 180 | 270) {
            bail!("rotation must be 0, 90, 180 or 270, got {}", rotation);
        }

        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|err| anyhow!("cannot open framebuffer {}: {}", path.display(), err))?;

        info!("using Sense HAT framebuffer {} (rotation {})", path.display(), rotation);
        Ok(Self { path, file, rotation })
    }

    /// Finds the framebuffer whose name matches the Sense HAT driver.
    pub fn discover(rotation: u16) -> Result<Self> {
        let entries = std::fs::read_dir(GRAPHICS_DIR)
            .map_err(|err| anyhow!("cannot list {}: {}", GRAPHICS_DIR, err))?;

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("fb") {
                continue;
            }

            let driver = std::fs::read_to_string(entry.path().join("name")).unwrap_or_default();
            if driver.trim() == FB_NAME {
                return Self::open(Path::new("/dev").join(name.as_ref()), rotation);
            }
        }

        bail!("no Sense HAT framebuffer found under {}", GRAPHICS_DIR)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedMatrix for SenseHat {
    fn set_pixels(&mut self, frame: &Frame) -> Result<()> {
        let bytes = encode(frame, self.rotation);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }
}

/// Physical position of logical pixel (x, y) after rotating the image clockwise.
pub fn rotate(x: usize, y: usize, rotation: u16) -> (usize, usize) {
    match rotation {
        90 => (WIDTH - 1 - y, x),
        180 => (WIDTH - 1 - x, HEIGHT - 1 - y),
        270 => (y, HEIGHT - 1 - x),
        _ => (x, y),
    }
}

pub fn rgb565(pixel: Rgb) -> u16 {
    let Rgb(r, g, b) = pixel;
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

pub fn encode(frame: &Frame, rotation: u16) -> [u8; WIDTH * HEIGHT * 2] {
    let mut out = [0u8; WIDTH * HEIGHT * 2];

    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let (px, py) = rotate(x, y, rotation);
            let offset = index(px, py) * 2;
            out[offset..offset + 2].copy_from_slice(&rgb565(frame[index(x, y)]).to_le_bytes());
        }
    }

    out
}
