use std::borrow::Cow;

use async_trait::async_trait;
use rayon::prelude::*;

use layerloom_core::{FrameBuffer, LayerloomError, LayerloomResult};

use crate::accumulator::FrameAccumulator;
use crate::artifact::Artifact;
use crate::dither::{index_pixels, Palette, TRANSPARENT_INDEX};
use crate::options::EncoderOptions;

/// One frame mapped onto its own 256-color palette.
struct IndexedFrame {
    palette: Vec<u8>,
    indices: Vec<u8>,
    has_transparency: bool,
}

fn quantize(frame: &FrameBuffer, options: &EncoderOptions) -> IndexedFrame {
    let palette = Palette::build(&frame.data, options.transparent, options.quality);
    let indices = index_pixels(
        &frame.data,
        frame.width,
        frame.height,
        &palette,
        options.dither,
        options.transparent,
    );
    let has_transparency = indices.contains(&TRANSPARENT_INDEX);
    IndexedFrame {
        palette: palette.rgb_table(options.transparent.unwrap_or([0, 0, 0])),
        indices,
        has_transparency,
    }
}

/// Encode `frames` into an animated GIF held in memory.
///
/// Frames are quantized in parallel on a pool of `options.workers` threads and
/// written in their original order.
pub fn encode_gif(frames: &[FrameBuffer], options: &EncoderOptions) -> LayerloomResult<Vec<u8>> {
    if frames.is_empty() {
        return Err(LayerloomError::Encode("no frames to encode for GIF".into()));
    }
    options.validate()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .build()
        .map_err(|e| LayerloomError::Encode(format!("failed to start encoder workers: {}", e)))?;
    let indexed: Vec<IndexedFrame> =
        pool.install(|| frames.par_iter().map(|f| quantize(f, options)).collect());

    let mut encoder = gif::Encoder::new(
        Vec::new(),
        options.width as u16,
        options.height as u16,
        &[],
    )
    .map_err(|e| LayerloomError::Encode(format!("failed to start GIF stream: {}", e)))?;

    let repeat = match options.repeat {
        None | Some(0) => gif::Repeat::Infinite,
        Some(n) => gif::Repeat::Finite(n),
    };
    encoder
        .set_repeat(repeat)
        .map_err(|e| LayerloomError::Encode(format!("failed to set GIF repeat: {}", e)))?;

    let delay = options.delay_cs();
    for (i, frame) in indexed.into_iter().enumerate() {
        let gif_frame = gif::Frame {
            width: options.width as u16,
            height: options.height as u16,
            delay,
            dispose: gif::DisposalMethod::Background,
            transparent: frame.has_transparency.then_some(TRANSPARENT_INDEX),
            palette: Some(frame.palette),
            buffer: Cow::Owned(frame.indices),
            ..gif::Frame::default()
        };
        encoder
            .write_frame(&gif_frame)
            .map_err(|e| LayerloomError::Encode(format!("failed to encode GIF frame {}: {}", i, e)))?;
    }

    let bytes = encoder
        .into_inner()
        .map_err(|e| LayerloomError::Encode(format!("failed to finish GIF stream: {}", e)))?;

    tracing::info!(
        "Encoded {} frames to GIF ({}x{}, delay={}cs, dither={}, {} bytes)",
        frames.len(),
        options.width,
        options.height,
        delay,
        options.dither,
        bytes.len(),
    );
    Ok(bytes)
}

/// Accumulates captures in memory and encodes them on a blocking task.
#[derive(Debug)]
pub struct GifAccumulator {
    options: EncoderOptions,
    frames: Vec<FrameBuffer>,
}

impl GifAccumulator {
    pub fn new(options: EncoderOptions) -> LayerloomResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            frames: Vec::new(),
        })
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }
}

#[async_trait]
impl FrameAccumulator for GifAccumulator {
    fn add_frame(&mut self, frame: FrameBuffer) -> LayerloomResult<()> {
        if frame.width != self.options.width || frame.height != self.options.height {
            return Err(LayerloomError::Encode(format!(
                "frame {} has dimensions {}x{}, expected {}x{}",
                self.frames.len(),
                frame.width,
                frame.height,
                self.options.width,
                self.options.height
            )));
        }
        self.frames.push(frame);
        Ok(())
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn clear(&mut self) {
        self.frames.clear();
    }

    async fn finish(&mut self) -> LayerloomResult<Artifact> {
        if self.frames.is_empty() {
            return Err(LayerloomError::Encode("no frames to encode for GIF".into()));
        }
        let frames = std::mem::take(&mut self.frames);
        let options = self.options.clone();
        let frame_count = frames.len();

        let bytes = tokio::task::spawn_blocking(move || encode_gif(&frames, &options))
            .await
            .map_err(|e| LayerloomError::Encode(format!("encoder task failed: {}", e)))??;

        Ok(Artifact {
            bytes,
            filename: self.options.filename.clone(),
            mime_type: self.options.mime_type.clone(),
            frame_count,
            width: self.options.width,
            height: self.options.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerloom_core::Color;

    #[test]
    fn test_gif_encode_empty_frames() {
        let result = encode_gif(&[], &EncoderOptions::new(4, 4));
        assert!(result.is_err());
    }

    #[test]
    fn test_gif_encode_solid_frames() {
        let frames: Vec<FrameBuffer> = (0..5)
            .map(|i| FrameBuffer::solid(4, 4, &Color::from_rgba8([255, i * 50, 0, 255])))
            .collect();
        let bytes = encode_gif(&frames, &EncoderOptions::new(4, 4)).unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
    }

    #[test]
    fn test_add_frame_rejects_wrong_size() {
        let mut acc = GifAccumulator::new(EncoderOptions::new(4, 4)).unwrap();
        assert!(acc.add_frame(FrameBuffer::solid(2, 2, &Color::RED)).is_err());
        assert_eq!(acc.frame_count(), 0);
    }

    #[test]
    fn test_clear_discards_captures() {
        let mut acc = GifAccumulator::new(EncoderOptions::new(2, 2)).unwrap();
        acc.add_frame(FrameBuffer::solid(2, 2, &Color::RED)).unwrap();
        acc.add_frame(FrameBuffer::solid(2, 2, &Color::RED)).unwrap();
        acc.clear();
        assert_eq!(acc.frame_count(), 0);
        acc.add_frame(FrameBuffer::solid(2, 2, &Color::WHITE)).unwrap();
        assert_eq!(acc.frame_count(), 1);
    }

    #[tokio::test]
    async fn test_finish_without_frames_fails() {
        let mut acc = GifAccumulator::new(EncoderOptions::new(4, 4)).unwrap();
        assert!(matches!(acc.finish().await, Err(LayerloomError::Encode(_))));
    }

    #[tokio::test]
    async fn test_finish_drains_frames() {
        let mut acc = GifAccumulator::new(EncoderOptions::new(2, 2)).unwrap();
        acc.add_frame(FrameBuffer::solid(2, 2, &Color::RED)).unwrap();
        acc.add_frame(FrameBuffer::solid(2, 2, &Color::WHITE)).unwrap();

        let artifact = acc.finish().await.unwrap();
        assert_eq!(artifact.frame_count, 2);
        assert_eq!(artifact.filename, "avali.gif");
        assert_eq!(artifact.mime_type, "image/gif");
        assert_eq!(acc.frame_count(), 0);
    }
}
