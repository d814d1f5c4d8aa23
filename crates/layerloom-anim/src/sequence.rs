use layerloom_core::{frame_location, AnimationConfig, LayerloomResult};
use layerloom_render::LayerSource;

/// Sources for every animated layer at one frame index.
#[derive(Debug, Clone)]
pub struct FrameRequest {
    pub index: u32,
    /// `(slot, source)` in slot order.
    pub sources: Vec<(usize, LayerSource)>,
}

/// Linear walk over frame indices `current..terminal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationSequence {
    base_path: String,
    layers: Vec<String>,
    pad_width: usize,
    current: u32,
    terminal: u32,
}

impl AnimationSequence {
    pub fn new(
        base_path: impl Into<String>,
        layers: Vec<String>,
        first_index: u32,
        terminal_index: u32,
        pad_width: usize,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            layers,
            pad_width,
            current: first_index,
            terminal: terminal_index,
        }
    }

    pub fn from_config(config: &AnimationConfig) -> Self {
        Self::new(
            config.base_path.clone(),
            config.layers.clone(),
            config.first_index,
            config.terminal_index,
            config.pad_width,
        )
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn terminal(&self) -> u32 {
        self.terminal
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.terminal
    }

    /// Frames left, including the current one.
    pub fn remaining(&self) -> u32 {
        self.terminal.saturating_sub(self.current)
    }

    /// Derive the per-layer sources for `index`.
    pub fn request_for(&self, index: u32) -> LayerloomResult<FrameRequest> {
        let sources = self
            .layers
            .iter()
            .enumerate()
            .map(|(slot, layer)| {
                let location = frame_location(&self.base_path, layer, index, self.pad_width);
                LayerSource::from_location(&location).map(|source| (slot, source))
            })
            .collect::<LayerloomResult<Vec<_>>>()?;
        Ok(FrameRequest { index, sources })
    }

    /// The request for the current index, or `None` once the terminal index is reached.
    pub fn next_request(&self) -> LayerloomResult<Option<FrameRequest>> {
        if self.is_finished() {
            return Ok(None);
        }
        self.request_for(self.current).map(Some)
    }

    pub fn advance(&mut self) {
        self.current += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence_covers_180_frames() {
        let sequence = AnimationSequence::from_config(&AnimationConfig::default());
        assert_eq!(sequence.current(), 1);
        assert_eq!(sequence.remaining(), 180);
        assert_eq!(sequence.layer_count(), 4);
    }

    #[test]
    fn test_request_derives_padded_locations() {
        let sequence = AnimationSequence::new(
            "anim0",
            vec!["light".into(), "dark".into()],
            1,
            181,
            4,
        );
        let request = sequence.request_for(12).unwrap();
        assert_eq!(request.index, 12);
        let labels: Vec<(usize, String)> = request
            .sources
            .iter()
            .map(|(slot, source)| (*slot, source.label()))
            .collect();
        assert_eq!(
            labels,
            vec![
                (0, "anim0/light/0012.png".to_string()),
                (1, "anim0/dark/0012.png".to_string())
            ]
        );
    }

    #[test]
    fn test_url_base_path_yields_url_sources() {
        let sequence =
            AnimationSequence::new("https://cdn.example/anim0/", vec!["light".into()], 1, 3, 4);
        let request = sequence.next_request().unwrap().unwrap();
        assert!(matches!(request.sources[0].1, LayerSource::Url(_)));
        assert_eq!(
            request.sources[0].1.label(),
            "https://cdn.example/anim0/light/0001.png"
        );
    }

    #[test]
    fn test_sequence_stops_at_terminal_index() {
        let mut sequence = AnimationSequence::new("a", vec!["x".into()], 1, 3, 4);
        assert!(sequence.next_request().unwrap().is_some());
        sequence.advance();
        assert!(sequence.next_request().unwrap().is_some());
        sequence.advance();
        assert!(sequence.is_finished());
        assert!(sequence.next_request().unwrap().is_none());
    }
}
