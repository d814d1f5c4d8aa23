//! The owned compositing context.
//!
//! A [`Session`] bundles everything one compositor instance needs: the
//! rendering surface, the quad, the layer registry, the shared program, the
//! loader, the frame synchronizer and the export sequence. Sessions are
//! independent of each other; dropping one releases all of it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use layerloom_core::{FrameBuffer, LayerloomConfig, LayerloomError, LayerloomResult};
use layerloom_render::{
    Compositor, DefaultFetcher, LayerLoader, LayerRegistry, LayerSource, LoadOutcome, LoadTask,
    QuadGeometry, RenderSurface, ShaderProgram, ShaderSources,
};

use crate::sequence::AnimationSequence;
use crate::sync::{FrameSynchronizer, SyncTransition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    Idle,
    Running,
    Finalizing,
}

pub struct Session<S: RenderSurface> {
    config: LayerloomConfig,
    surface: S,
    geometry: QuadGeometry,
    registry: LayerRegistry,
    program: ShaderProgram,
    compositor: Compositor,
    loader: LayerLoader,
    sync: FrameSynchronizer,
    sequence: Option<AnimationSequence>,
    state: DriverState,
}

impl<S: RenderSurface> Session<S> {
    /// Session loading files and URLs through the default fetcher.
    pub fn new(surface: S, config: LayerloomConfig) -> LayerloomResult<Self> {
        let timeout = Duration::from_millis(config.animation.load_timeout_ms);
        let loader = LayerLoader::new(Arc::new(DefaultFetcher::new()), timeout);
        Self::with_loader(surface, config, loader)
    }

    /// Initialise the pipeline on `surface`. Shader or surface problems are fatal.
    pub fn with_loader(
        mut surface: S,
        config: LayerloomConfig,
        loader: LayerLoader,
    ) -> LayerloomResult<Self> {
        config.validate()?;
        let (width, height) = surface.size();
        if (width, height) != (config.canvas.width, config.canvas.height) {
            return Err(LayerloomError::InvalidArgument(format!(
                "surface is {}x{} but the canvas is configured as {}x{}",
                width, height, config.canvas.width, config.canvas.height
            )));
        }

        let sources = shader_sources(&surface, &config)?;
        let slots = config.slot_count();
        let program = ShaderProgram::build(&mut surface, &sources, slots)?;
        let geometry = QuadGeometry::upload(&mut surface)?;
        let registry = LayerRegistry::with_layers(&mut surface, slots, config.canvas.placeholder)?;
        let compositor = Compositor::new(config.canvas.background);

        tracing::info!(
            "Session ready: {}x{} canvas, {} layer slots",
            width,
            height,
            slots
        );
        Ok(Self {
            config,
            surface,
            geometry,
            registry,
            program,
            compositor,
            loader,
            sync: FrameSynchronizer::new(),
            sequence: None,
            state: DriverState::Idle,
        })
    }

    pub fn config(&self) -> &LayerloomConfig {
        &self.config
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.sync
    }

    /// The active export sequence, if a run is in progress.
    pub fn sequence(&self) -> Option<&AnimationSequence> {
        self.sequence.as_ref()
    }

    /// Composite the registry as it stands.
    pub fn redraw(&mut self) -> LayerloomResult<()> {
        self.compositor
            .draw(&mut self.surface, &self.program, &self.geometry, &self.registry)
    }

    /// Read back the most recent composite.
    pub fn snapshot(&mut self) -> LayerloomResult<FrameBuffer> {
        self.surface.read_pixels()
    }

    /// Start loading `source` into `slot`, superseding any earlier load for it.
    pub fn request_load(&mut self, slot: usize, source: LayerSource) -> LayerloomResult<LoadTask> {
        let generation = self.registry.begin_load(slot)?;
        tracing::debug!("loading {} into slot {} (generation {})", source, slot, generation);
        Ok(self.loader.load(slot, generation, source))
    }

    /// Write a finished load into its slot. Returns `Ok(false)` for a superseded
    /// load, whether it succeeded or not.
    ///
    /// A failed load leaves the slot's previous image in place.
    pub fn apply_outcome(&mut self, outcome: LoadOutcome) -> LayerloomResult<bool> {
        if self.registry.is_stale(outcome.slot, outcome.generation)? {
            tracing::debug!(
                "ignoring superseded load of {} for slot {}",
                outcome.source,
                outcome.slot
            );
            return Ok(false);
        }
        let image = outcome.result?;
        self.registry.apply(
            &mut self.surface,
            outcome.slot,
            outcome.generation,
            &outcome.source,
            &image,
        )
    }

    /// Replace one layer's image outside of any export run.
    ///
    /// The sequence index and the frame synchronizer are left alone; call
    /// [`Session::redraw`] to see the result.
    pub async fn replace_layer(&mut self, slot: usize, source: LayerSource) -> LayerloomResult<bool> {
        let task = self.request_load(slot, source)?;
        let outcome = task.await;
        let label = outcome.source.clone();
        let applied = self.apply_outcome(outcome)?;
        if applied {
            tracing::info!("Replaced layer {} with {}", slot, label);
        }
        Ok(applied)
    }

    /// Claim the session for an export run over `sequence`.
    ///
    /// Fails with [`LayerloomError::AlreadyRunning`] unless the session is idle.
    /// The session returns to idle when the guard is dropped, including when a
    /// run is abandoned part-way.
    pub fn begin_run(&mut self, sequence: AnimationSequence) -> LayerloomResult<RunGuard<'_, S>> {
        if self.state != DriverState::Idle {
            return Err(LayerloomError::AlreadyRunning);
        }
        self.state = DriverState::Running;
        self.sequence = Some(sequence);
        Ok(RunGuard { session: self })
    }

    pub(crate) fn set_state(&mut self, state: DriverState) {
        self.state = state;
    }

    pub(crate) fn sequence_mut(&mut self) -> Option<&mut AnimationSequence> {
        self.sequence.as_mut()
    }

    pub(crate) fn arm_frame(&mut self, frame: u32, expected: usize) {
        self.sync.reset(frame, expected);
    }

    pub(crate) fn record_completion(&mut self) -> LayerloomResult<SyncTransition> {
        self.sync.record_completion()
    }

    fn end_run(&mut self) {
        self.state = DriverState::Idle;
        self.sequence = None;
        self.sync = FrameSynchronizer::new();
    }
}

fn shader_sources<S: RenderSurface>(
    surface: &S,
    config: &LayerloomConfig,
) -> LayerloomResult<ShaderSources> {
    let mut sources = surface.stock_shaders();
    if let Some(path) = &config.shader.vertex {
        sources.vertex = std::fs::read_to_string(path).map_err(|e| {
            LayerloomError::asset(format!("failed to read vertex shader: {}", e), path)
        })?;
    }
    if let Some(path) = &config.shader.fragment {
        sources.fragment = std::fs::read_to_string(path).map_err(|e| {
            LayerloomError::asset(format!("failed to read fragment shader: {}", e), path)
        })?;
    }
    Ok(sources)
}

/// Exclusive handle on a session for the length of one export run.
pub struct RunGuard<'a, S: RenderSurface> {
    session: &'a mut Session<S>,
}

impl<S: RenderSurface> Deref for RunGuard<'_, S> {
    type Target = Session<S>;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<S: RenderSurface> DerefMut for RunGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<S: RenderSurface> Drop for RunGuard<'_, S> {
    fn drop(&mut self) {
        self.session.end_run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerloom_core::Color;
    use layerloom_render::SoftwareSurface;

    fn session(layers: &[&str]) -> Session<SoftwareSurface> {
        let mut config = LayerloomConfig::default();
        config.canvas.width = 4;
        config.canvas.height = 4;
        config.animation.layers = layers.iter().map(|s| s.to_string()).collect();
        Session::new(SoftwareSurface::new(4, 4).unwrap(), config).unwrap()
    }

    #[test]
    fn test_new_session_is_idle_with_placeholders() {
        let mut session = session(&["light", "dark"]);
        assert_eq!(session.state(), DriverState::Idle);
        assert_eq!(session.registry().len(), 2);
        session.redraw().unwrap();
        let frame = session.snapshot().unwrap();
        assert_eq!(frame.get_pixel(1, 1), Some(Color::BLUE.to_rgba8()));
    }

    #[test]
    fn test_surface_must_match_canvas() {
        let config = LayerloomConfig::default();
        let result = Session::new(SoftwareSurface::new(4, 4).unwrap(), config);
        assert!(matches!(result, Err(LayerloomError::InvalidArgument(_))));
    }

    #[test]
    fn test_begin_run_guards_reentry() {
        let mut session = session(&["light"]);
        let sequence = AnimationSequence::new("anim0", vec!["light".into()], 1, 3, 4);
        {
            let mut run = session.begin_run(sequence.clone()).unwrap();
            assert_eq!(run.state(), DriverState::Running);
            assert!(matches!(
                run.begin_run(sequence.clone()),
                Err(LayerloomError::AlreadyRunning)
            ));
        }
        assert_eq!(session.state(), DriverState::Idle);
        assert!(session.sequence().is_none());
        assert!(session.begin_run(sequence).is_ok());
    }

    #[tokio::test]
    async fn test_superseded_failure_is_ignored() {
        let mut session = session(&["light"]);
        let first = session
            .request_load(0, LayerSource::File("/nonexistent/0001.png".into()))
            .unwrap();
        let second = session
            .request_load(0, LayerSource::File("/nonexistent/0002.png".into()))
            .unwrap();

        let stale = first.await;
        assert!(stale.result.is_err());
        assert!(!session.apply_outcome(stale).unwrap());

        let current = second.await;
        assert!(matches!(
            session.apply_outcome(current),
            Err(LayerloomError::Load { slot: 0, .. })
        ));
        assert!(session.registry().layer(0).unwrap().source.is_none());
    }

    #[test]
    fn test_missing_shader_override_is_fatal() {
        let mut config = LayerloomConfig::default();
        config.canvas.width = 4;
        config.canvas.height = 4;
        config.shader.fragment = Some("/nonexistent/composite.frag".into());
        let result = Session::new(SoftwareSurface::new(4, 4).unwrap(), config);
        assert!(matches!(result, Err(LayerloomError::Asset { .. })));
    }
}
