//! Fixed-size table of layer textures, one per compositing slot.

use layerloom_core::{Color, FrameBuffer, LayerloomError, LayerloomResult, MAX_LAYERS};

use crate::surface::{RenderSurface, Sampling, TextureId};

/// One compositing slot.
#[derive(Debug, Clone)]
pub struct Layer {
    pub slot: usize,
    /// Owned by the registry for the layer's whole life.
    pub texture: TextureId,
    /// Label of the image currently in the texture. None while the placeholder shows.
    pub source: Option<String>,
    /// Bumped by every load request for this slot.
    pub generation: u64,
    /// Generation of the image currently in the texture.
    pub applied_generation: u64,
}

#[derive(Debug)]
pub struct LayerRegistry {
    layers: Vec<Option<Layer>>,
    placeholder: Color,
}

impl LayerRegistry {
    pub fn new(placeholder: Color) -> Self {
        Self {
            layers: Vec::new(),
            placeholder,
        }
    }

    /// Registry with slots `0..count` already created.
    pub fn with_layers<S: RenderSurface + ?Sized>(
        surface: &mut S,
        count: usize,
        placeholder: Color,
    ) -> LayerloomResult<Self> {
        let mut registry = Self::new(placeholder);
        for slot in 0..count {
            registry.create_layer(surface, slot)?;
        }
        Ok(registry)
    }

    /// Allocate the slot's texture and fill it with the 1×1 placeholder pixel.
    pub fn create_layer<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        slot: usize,
    ) -> LayerloomResult<TextureId> {
        if slot >= MAX_LAYERS {
            return Err(LayerloomError::InvalidArgument(format!(
                "slot {} exceeds the {} available layers",
                slot, MAX_LAYERS
            )));
        }
        if self.layer(slot).is_some() {
            return Err(LayerloomError::InvalidArgument(format!(
                "slot {} is already registered",
                slot
            )));
        }
        let texture = surface.create_texture()?;
        surface.upload_texture(
            texture,
            &FrameBuffer::solid(1, 1, &self.placeholder),
            Sampling::PIXEL_ART,
        )?;
        if self.layers.len() <= slot {
            self.layers.resize(slot + 1, None);
        }
        self.layers[slot] = Some(Layer {
            slot,
            texture,
            source: None,
            generation: 0,
            applied_generation: 0,
        });
        tracing::debug!("registered layer slot {} as {:?}", slot, texture);
        Ok(texture)
    }

    pub fn layer(&self, slot: usize) -> Option<&Layer> {
        self.layers.get(slot).and_then(|l| l.as_ref())
    }

    pub fn texture(&self, slot: usize) -> Option<TextureId> {
        self.layer(slot).map(|l| l.texture)
    }

    /// Registered layers in increasing slot order.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.layers().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind the slot's texture to `unit`. An unregistered slot is a programming error.
    pub fn bind_for_draw<S: RenderSurface + ?Sized>(
        &self,
        surface: &mut S,
        slot: usize,
        unit: u32,
    ) -> LayerloomResult<()> {
        let texture = self
            .texture(slot)
            .ok_or(LayerloomError::UnregisteredSlot(slot))?;
        surface.bind_texture(unit, texture);
        Ok(())
    }

    /// Record a new load request for `slot` and return its generation.
    pub fn begin_load(&mut self, slot: usize) -> LayerloomResult<u64> {
        let layer = self
            .layers
            .get_mut(slot)
            .and_then(|l| l.as_mut())
            .ok_or(LayerloomError::UnregisteredSlot(slot))?;
        layer.generation += 1;
        Ok(layer.generation)
    }

    /// Whether a newer load for `slot` has been requested since `generation` was issued.
    pub fn is_stale(&self, slot: usize, generation: u64) -> LayerloomResult<bool> {
        let layer = self.layer(slot).ok_or(LayerloomError::UnregisteredSlot(slot))?;
        Ok(generation < layer.generation)
    }

    /// Write a decoded image into the slot's existing texture.
    ///
    /// Returns `Ok(false)` without touching the texture when a newer load for
    /// the slot has been requested since `generation` was issued.
    pub fn apply<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        slot: usize,
        generation: u64,
        source: &str,
        image: &FrameBuffer,
    ) -> LayerloomResult<bool> {
        if self.is_stale(slot, generation)? {
            tracing::debug!("dropping stale image for slot {} (generation {})", slot, generation);
            return Ok(false);
        }
        let layer = self
            .layers
            .get_mut(slot)
            .and_then(|l| l.as_mut())
            .ok_or(LayerloomError::UnregisteredSlot(slot))?;
        surface.upload_texture(layer.texture, image, Sampling::PIXEL_ART)?;
        layer.source = Some(source.to_string());
        layer.applied_generation = generation;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareSurface;

    #[test]
    fn test_layers_start_with_placeholder() {
        let mut surface = SoftwareSurface::new(2, 2).unwrap();
        let registry = LayerRegistry::with_layers(&mut surface, 4, Color::BLUE).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.layers().all(|l| l.source.is_none()));
        assert_eq!(surface.stats().texture_uploads, 4);
    }

    #[test]
    fn test_replacing_image_keeps_texture_identity() {
        let mut surface = SoftwareSurface::new(2, 2).unwrap();
        let mut registry = LayerRegistry::with_layers(&mut surface, 2, Color::BLUE).unwrap();
        let before = registry.texture(1).unwrap();

        let generation = registry.begin_load(1).unwrap();
        let applied = registry
            .apply(&mut surface, 1, generation, "dark/0001.png", &FrameBuffer::solid(3, 3, &Color::RED))
            .unwrap();

        assert!(applied);
        assert_eq!(registry.texture(1), Some(before));
        assert_eq!(registry.layer(1).unwrap().source.as_deref(), Some("dark/0001.png"));
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let mut surface = SoftwareSurface::new(2, 2).unwrap();
        let mut registry = LayerRegistry::with_layers(&mut surface, 1, Color::BLUE).unwrap();
        let first = registry.begin_load(0).unwrap();
        let second = registry.begin_load(0).unwrap();
        assert!(registry.is_stale(0, first).unwrap());
        assert!(!registry.is_stale(0, second).unwrap());
        assert!(registry.is_stale(3, second).is_err());

        let image = FrameBuffer::solid(1, 1, &Color::RED);
        assert!(registry.apply(&mut surface, 0, second, "b", &image).unwrap());
        assert!(!registry.apply(&mut surface, 0, first, "a", &image).unwrap());
        assert_eq!(registry.layer(0).unwrap().source.as_deref(), Some("b"));
    }

    #[test]
    fn test_binding_unregistered_slot_is_an_error() {
        let mut surface = SoftwareSurface::new(2, 2).unwrap();
        let registry = LayerRegistry::with_layers(&mut surface, 2, Color::BLUE).unwrap();
        assert!(matches!(
            registry.bind_for_draw(&mut surface, 5, 5),
            Err(LayerloomError::UnregisteredSlot(5))
        ));
    }

    #[test]
    fn test_slot_capacity_is_bounded() {
        let mut surface = SoftwareSurface::new(2, 2).unwrap();
        let mut registry = LayerRegistry::new(Color::BLUE);
        assert!(registry.create_layer(&mut surface, MAX_LAYERS).is_err());
        registry.create_layer(&mut surface, 0).unwrap();
        assert!(registry.create_layer(&mut surface, 0).is_err());
    }
}
