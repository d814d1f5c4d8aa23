use crate::Color;

/// An RGBA8 raster, rows top-down: a decoded layer image or a captured composite.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl FrameBuffer {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Fully transparent raster.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * Self::BYTES_PER_PIXEL],
            width,
            height,
        }
    }

    pub fn solid(width: u32, height: u32, color: &Color) -> Self {
        let pixel = color.to_rgba8();
        Self {
            data: pixel.repeat(width as usize * height as usize),
            width,
            height,
        }
    }

    /// Wrap decoded bytes. `None` unless `data` holds exactly `width * height` pixels.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * Self::BYTES_PER_PIXEL).then_some(Self {
            data,
            width,
            height,
        })
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL)
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let at = self.offset(x, y)?;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[at..at + Self::BYTES_PER_PIXEL]);
        Some(px)
    }

    /// Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if let Some(at) = self.offset(x, y) {
            self.data[at..at + Self::BYTES_PER_PIXEL].copy_from_slice(&rgba);
        }
    }

    /// Iterate over the pixels in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 4]> + '_ {
        self.data
            .chunks_exact(Self::BYTES_PER_PIXEL)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }
}
