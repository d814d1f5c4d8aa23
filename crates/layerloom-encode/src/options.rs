use layerloom_core::{
    CanvasConfig, Dither, EncoderConfig, ExportConfig, LayerloomError, LayerloomResult,
};

/// Everything the GIF accumulator needs to know up front.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOptions {
    pub width: u32,
    pub height: u32,
    pub workers: usize,
    pub quality: u32,
    /// RGB key written as the transparent palette entry.
    pub transparent: Option<[u8; 3]>,
    pub dither: Dither,
    pub delay_ms: u32,
    pub repeat: Option<u16>,
    pub filename: String,
    pub mime_type: String,
}

impl EncoderOptions {
    /// Options for a `width`×`height` sequence with the stock encoder settings.
    pub fn new(width: u32, height: u32) -> Self {
        let encoder = EncoderConfig::default();
        let export = ExportConfig::default();
        Self {
            width,
            height,
            workers: encoder.workers,
            quality: encoder.quality,
            transparent: encoder.transparent.map(|c| c.to_rgb8()),
            dither: encoder.dither,
            delay_ms: encoder.delay_ms,
            repeat: encoder.repeat,
            filename: export.filename,
            mime_type: export.mime_type,
        }
    }

    pub fn from_config(
        canvas: &CanvasConfig,
        encoder: &EncoderConfig,
        export: &ExportConfig,
    ) -> LayerloomResult<Self> {
        let options = Self {
            width: canvas.width,
            height: canvas.height,
            workers: encoder.workers,
            quality: encoder.quality,
            transparent: encoder.transparent.map(|c| c.to_rgb8()),
            dither: encoder.dither,
            delay_ms: encoder.delay_ms,
            repeat: encoder.repeat,
            filename: export.filename.clone(),
            mime_type: export.mime_type.clone(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn with_dither(mut self, dither: Dither) -> Self {
        self.dither = dither;
        self
    }

    pub fn with_transparent(mut self, key: Option<[u8; 3]>) -> Self {
        self.transparent = key;
        self
    }

    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> LayerloomResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(LayerloomError::Config("frame size must be non-zero".into()));
        }
        if self.width > u16::MAX as u32 || self.height > u16::MAX as u32 {
            return Err(LayerloomError::Config(format!(
                "{}x{} exceeds the GIF size limit",
                self.width, self.height
            )));
        }
        if !(1..=30).contains(&self.quality) {
            return Err(LayerloomError::Config(format!(
                "quality {} is outside 1..=30",
                self.quality
            )));
        }
        if self.workers == 0 {
            return Err(LayerloomError::Config("at least one worker is required".into()));
        }
        Ok(())
    }

    /// Inter-frame delay in centiseconds (GIF unit).
    pub fn delay_cs(&self) -> u16 {
        ((self.delay_ms as f64 / 10.0).round() as u16).max(2) // GIF minimum is ~2cs
    }
}
