//! Palette construction and error-diffusion mapping of RGBA pixels to indices.

use std::collections::HashMap;

use color_quant::NeuQuant;
use layerloom_core::{Dither, DitherKernel};

/// Palette index reserved for transparent pixels.
pub const TRANSPARENT_INDEX: u8 = 255;
/// Colors available to opaque pixels.
pub const MAX_COLORS: usize = 255;

/// Error-diffusion taps as `(dx, dy, weight)`; weights are already normalised.
type Taps = &'static [(i32, i32, f32)];

const FLOYD_STEINBERG: Taps = &[
    (1, 0, 7.0 / 16.0),
    (-1, 1, 3.0 / 16.0),
    (0, 1, 5.0 / 16.0),
    (1, 1, 1.0 / 16.0),
];

const FALSE_FLOYD_STEINBERG: Taps = &[(1, 0, 3.0 / 8.0), (0, 1, 3.0 / 8.0), (1, 1, 2.0 / 8.0)];

const STUCKI: Taps = &[
    (1, 0, 8.0 / 42.0),
    (2, 0, 4.0 / 42.0),
    (-2, 1, 2.0 / 42.0),
    (-1, 1, 4.0 / 42.0),
    (0, 1, 8.0 / 42.0),
    (1, 1, 4.0 / 42.0),
    (2, 1, 2.0 / 42.0),
    (-2, 2, 1.0 / 42.0),
    (-1, 2, 2.0 / 42.0),
    (0, 2, 4.0 / 42.0),
    (1, 2, 2.0 / 42.0),
    (2, 2, 1.0 / 42.0),
];

// Atkinson only propagates 6/8 of the error.
const ATKINSON: Taps = &[
    (1, 0, 1.0 / 8.0),
    (2, 0, 1.0 / 8.0),
    (-1, 1, 1.0 / 8.0),
    (0, 1, 1.0 / 8.0),
    (1, 1, 1.0 / 8.0),
    (0, 2, 1.0 / 8.0),
];

fn taps(kernel: DitherKernel) -> Taps {
    match kernel {
        DitherKernel::None => &[],
        DitherKernel::FloydSteinberg => FLOYD_STEINBERG,
        DitherKernel::FalseFloydSteinberg => FALSE_FLOYD_STEINBERG,
        DitherKernel::Stucki => STUCKI,
        DitherKernel::Atkinson => ATKINSON,
    }
}

/// Whether an RGBA pixel is written as the transparent index.
pub fn is_transparent(pixel: &[u8], key: Option<[u8; 3]>) -> bool {
    pixel[3] < 128 || key == Some([pixel[0], pixel[1], pixel[2]])
}

/// Colors a frame's opaque pixels are mapped onto.
pub enum Palette {
    /// The frame has few enough colors to keep every one of them.
    Exact {
        colors: Vec<[u8; 3]>,
        lookup: HashMap<[u8; 3], u8>,
    },
    /// NeuQuant network trained on the frame.
    Learned(NeuQuant),
}

impl Palette {
    /// Build a palette for `pixels` (RGBA), skipping transparent ones.
    ///
    /// `quality` is the NeuQuant sampling factor: 1 samples every pixel, 30 every 30th.
    pub fn build(pixels: &[u8], key: Option<[u8; 3]>, quality: u32) -> Self {
        let mut lookup = HashMap::new();
        let mut colors = Vec::new();
        let mut opaque = Vec::with_capacity(pixels.len());
        let mut exact = true;

        for px in pixels.chunks_exact(4) {
            if is_transparent(px, key) {
                continue;
            }
            opaque.extend_from_slice(&[px[0], px[1], px[2], 255]);
            if exact {
                let rgb = [px[0], px[1], px[2]];
                if !lookup.contains_key(&rgb) {
                    if colors.len() == MAX_COLORS {
                        exact = false;
                        continue;
                    }
                    lookup.insert(rgb, colors.len() as u8);
                    colors.push(rgb);
                }
            }
        }

        if exact {
            return Palette::Exact { colors, lookup };
        }
        Palette::Learned(NeuQuant::new(quality as i32, MAX_COLORS, &opaque))
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Palette::Exact { .. })
    }

    pub fn index_of(&self, rgb: [u8; 3]) -> u8 {
        match self {
            Palette::Exact { colors, lookup } => match lookup.get(&rgb) {
                Some(index) => *index,
                None => nearest(colors, rgb),
            },
            Palette::Learned(nq) => nq.index_of(&[rgb[0], rgb[1], rgb[2], 255]) as u8,
        }
    }

    pub fn color(&self, index: u8) -> [u8; 3] {
        match self {
            Palette::Exact { colors, .. } => colors.get(index as usize).copied().unwrap_or([0; 3]),
            Palette::Learned(nq) => nq
                .lookup(index as usize)
                .map(|c| [c[0], c[1], c[2]])
                .unwrap_or([0; 3]),
        }
    }

    /// The full 256-entry RGB table; the last entry holds `transparent`.
    pub fn rgb_table(&self, transparent: [u8; 3]) -> Vec<u8> {
        let mut table = Vec::with_capacity(256 * 3);
        for index in 0..MAX_COLORS {
            table.extend_from_slice(&self.color(index as u8));
        }
        table.extend_from_slice(&transparent);
        table
    }
}

fn nearest(colors: &[[u8; 3]], rgb: [u8; 3]) -> u8 {
    colors
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| {
            (0..3)
                .map(|i| {
                    let d = c[i] as i32 - rgb[i] as i32;
                    d * d
                })
                .sum::<i32>()
        })
        .map(|(i, _)| i as u8)
        .unwrap_or(0)
}

/// Map every pixel to a palette index, diffusing quantization error with `dither`.
pub fn index_pixels(
    pixels: &[u8],
    width: u32,
    height: u32,
    palette: &Palette,
    dither: Dither,
    key: Option<[u8; 3]>,
) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut indices = vec![TRANSPARENT_INDEX; w * h];
    // An exact palette leaves no error to spread.
    let spread: Taps = if palette.is_exact() {
        &[]
    } else {
        taps(dither.kernel)
    };
    let mut error = vec![[0.0f32; 3]; if spread.is_empty() { 0 } else { w * h }];

    for y in 0..h {
        let reverse = dither.serpentine && y % 2 == 1;
        for step in 0..w {
            let x = if reverse { w - 1 - step } else { step };
            let i = y * w + x;
            let px = &pixels[i * 4..i * 4 + 4];
            if is_transparent(px, key) {
                continue;
            }

            if spread.is_empty() {
                indices[i] = palette.index_of([px[0], px[1], px[2]]);
                continue;
            }

            let mut wanted = [0.0f32; 3];
            let mut rgb = [0u8; 3];
            for c in 0..3 {
                wanted[c] = (px[c] as f32 + error[i][c]).clamp(0.0, 255.0);
                rgb[c] = wanted[c].round() as u8;
            }
            let index = palette.index_of(rgb);
            indices[i] = index;

            let got = palette.color(index);
            let residual = [
                wanted[0] - got[0] as f32,
                wanted[1] - got[1] as f32,
                wanted[2] - got[2] as f32,
            ];
            for &(dx, dy, weight) in spread {
                let dx = if reverse { -dx } else { dx };
                let nx = x as i64 + dx as i64;
                let ny = y as i64 + dy as i64;
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let target = &mut error[ny as usize * w + nx as usize];
                for c in 0..3 {
                    target[c] += residual[c] * weight;
                }
            }
        }
    }
    indices
}
