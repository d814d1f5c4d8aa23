use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Color, LayerloomError, LayerloomResult, MAX_LAYERS};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    /// Clear color behind the composite.
    pub background: Color,
    /// Number of registry slots. Defaults to the number of animated layers.
    pub layer_count: Option<usize>,
    /// Pixel every slot shows before its first image arrives.
    pub placeholder: Color,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            background: Color::BLACK,
            layer_count: None,
            placeholder: Color::BLUE,
        }
    }
}

/// What happens to a frame when one of its layer loads fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadFailurePolicy {
    /// Keep the slot's previous image and let the frame proceed.
    #[default]
    Hold,
    /// Fail the whole run.
    Abort,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Directory or URL prefix holding one sub-directory per layer.
    pub base_path: String,
    /// Layer names, in slot order.
    pub layers: Vec<String>,
    pub first_index: u32,
    /// Exclusive upper bound of the frame index.
    pub terminal_index: u32,
    pub pad_width: usize,
    pub load_timeout_ms: u64,
    pub on_load_failure: LoadFailurePolicy,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            base_path: "anim0".to_string(),
            layers: ["light", "dark", "mapper", "mapper2"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            first_index: 1,
            terminal_index: 181,
            pad_width: 4,
            load_timeout_ms: 10_000,
            on_load_failure: LoadFailurePolicy::Hold,
        }
    }
}

/// Error-diffusion kernel used while mapping pixels onto the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherKernel {
    None,
    FloydSteinberg,
    FalseFloydSteinberg,
    Stucki,
    Atkinson,
}

/// Dithering selector, e.g. `FloydSteinberg-serpentine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dither {
    pub kernel: DitherKernel,
    /// Alternate scan direction on every row.
    pub serpentine: bool,
}

impl Dither {
    pub const NONE: Dither = Dither {
        kernel: DitherKernel::None,
        serpentine: false,
    };
}

impl Default for Dither {
    fn default() -> Self {
        Dither {
            kernel: DitherKernel::FloydSteinberg,
            serpentine: true,
        }
    }
}

impl FromStr for Dither {
    type Err = LayerloomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, serpentine) = match s.strip_suffix("-serpentine") {
            Some(name) => (name, true),
            None => (s, false),
        };
        let kernel = match name {
            "none" | "false" | "" => DitherKernel::None,
            "FloydSteinberg" => DitherKernel::FloydSteinberg,
            "FalseFloydSteinberg" => DitherKernel::FalseFloydSteinberg,
            "Stucki" => DitherKernel::Stucki,
            "Atkinson" => DitherKernel::Atkinson,
            other => {
                return Err(LayerloomError::Config(format!(
                    "unknown dithering algorithm '{}'",
                    other
                )))
            }
        };
        if kernel == DitherKernel::None && serpentine {
            return Err(LayerloomError::Config(
                "serpentine scanning needs a dithering kernel".into(),
            ));
        }
        Ok(Dither { kernel, serpentine })
    }
}

impl fmt::Display for Dither {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kernel {
            DitherKernel::None => return write!(f, "none"),
            DitherKernel::FloydSteinberg => "FloydSteinberg",
            DitherKernel::FalseFloydSteinberg => "FalseFloydSteinberg",
            DitherKernel::Stucki => "Stucki",
            DitherKernel::Atkinson => "Atkinson",
        };
        if self.serpentine {
            write!(f, "{}-serpentine", name)
        } else {
            write!(f, "{}", name)
        }
    }
}

impl TryFrom<String> for Dither {
    type Error = LayerloomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dither> for String {
    fn from(dither: Dither) -> Self {
        dither.to_string()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Worker threads used to quantize frames.
    pub workers: usize,
    /// Palette sampling factor: 1 is best, 30 is fastest.
    pub quality: u32,
    /// Color rendered fully transparent in the output.
    pub transparent: Option<Color>,
    pub dither: Dither,
    pub delay_ms: u32,
    /// Loop count; unset loops forever.
    pub repeat: Option<u16>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            quality: 10,
            transparent: Some(Color::from_rgb_u32(0x00FF00)),
            dither: Dither::default(),
            delay_ms: 30,
            repeat: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    pub filename: String,
    pub mime_type: String,
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            filename: "avali.gif".to_string(),
            mime_type: "image/gif".to_string(),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Optional overrides for the surface's stock shader stages.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: Option<PathBuf>,
    pub fragment: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LayerloomConfig {
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub shader: ShaderConfig,
}

impl LayerloomConfig {
    pub fn load_from_file(path: &Path) -> LayerloomResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> LayerloomResult<Self> {
        let config: LayerloomConfig =
            toml::from_str(contents).map_err(|e| LayerloomError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> LayerloomResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| LayerloomError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Number of registry slots the compositor draws.
    pub fn slot_count(&self) -> usize {
        self.canvas
            .layer_count
            .unwrap_or(self.animation.layers.len())
    }

    pub fn validate(&self) -> LayerloomResult<()> {
        let slots = self.slot_count();
        if slots == 0 || slots > MAX_LAYERS {
            return Err(LayerloomError::Config(format!(
                "layer count must be between 1 and {}, got {}",
                MAX_LAYERS, slots
            )));
        }
        if self.animation.layers.len() > slots {
            return Err(LayerloomError::Config(format!(
                "{} animated layers do not fit in {} slots",
                self.animation.layers.len(),
                slots
            )));
        }
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(LayerloomError::Config("canvas size must be non-zero".into()));
        }
        if self.animation.first_index == 0 {
            return Err(LayerloomError::Config("frame indices start at 1".into()));
        }
        if self.animation.terminal_index <= self.animation.first_index {
            return Err(LayerloomError::Config(format!(
                "terminal_index {} leaves no frames after first_index {}",
                self.animation.terminal_index, self.animation.first_index
            )));
        }
        if !(1..=30).contains(&self.encoder.quality) {
            return Err(LayerloomError::Config(format!(
                "encoder quality must be within 1..=30, got {}",
                self.encoder.quality
            )));
        }
        Ok(())
    }
}
