use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use layerloom_core::{LayerloomError, LayerloomResult, LoadFailurePolicy};
use layerloom_encode::{ArtifactInfo, ArtifactSink, FrameAccumulator};
use layerloom_render::{LoadTask, RenderSurface};

use crate::sequence::AnimationSequence;
use crate::session::{DriverState, RunGuard, Session};
use crate::sync::SyncTransition;

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    LoadCompleted { frame: u32, slot: usize, ok: bool },
    FrameDrawn { frame: u32 },
    Finalized { frames: u32 },
}

/// What an export run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub frames: u32,
    pub layers: usize,
    /// Layer loads that failed and kept their previous image.
    pub held_loads: usize,
    pub location: String,
    pub artifact: ArtifactInfo,
    pub elapsed_ms: u64,
}

/// Walks the animation sequence, gating every composite on a full set of
/// layer loads, and hands the encoded result to a sink.
#[derive(Debug, Clone, Default)]
pub struct AnimationDriver {
    events: Option<UnboundedSender<DriverEvent>>,
}

impl AnimationDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, events: UnboundedSender<DriverEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: DriverEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the configured sequence from its first index to completion.
    ///
    /// Dropping the returned future abandons the run: pending loads are
    /// cancelled and never reach the registry, and the session goes back to idle.
    pub async fn run<S, A>(
        &self,
        session: &mut Session<S>,
        accumulator: &mut A,
        sink: &dyn ArtifactSink,
    ) -> LayerloomResult<ExportSummary>
    where
        S: RenderSurface,
        A: FrameAccumulator + ?Sized,
    {
        let started = Instant::now();
        let sequence = AnimationSequence::from_config(&session.config().animation);
        if sequence.layer_count() == 0 {
            return Err(LayerloomError::InvalidArgument(
                "no animated layers configured".into(),
            ));
        }
        let policy = session.config().animation.on_load_failure;
        let layers = sequence.layer_count();
        let total = sequence.remaining();

        let mut run = session.begin_run(sequence)?;
        // Captures never outlive the run that produced them.
        accumulator.clear();
        tracing::info!("Starting export: {} frames x {} layers", total, layers);

        let (frames, held_loads) = match self.walk(&mut run, accumulator, policy).await {
            Ok(counts) => counts,
            Err(e) => {
                accumulator.clear();
                return Err(e);
            }
        };

        run.set_state(DriverState::Finalizing);
        tracing::info!("Finalizing {} captured frames", accumulator.frame_count());
        let artifact = match accumulator.finish().await {
            Ok(artifact) => artifact,
            Err(e) => {
                accumulator.clear();
                return Err(e);
            }
        };
        let location = sink.deliver(&artifact).await?;
        self.emit(DriverEvent::Finalized { frames });
        drop(run);

        let summary = ExportSummary {
            frames,
            layers,
            held_loads,
            location,
            artifact: artifact.info(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "Export complete: {} frames, {} bytes in {}ms",
            summary.frames,
            summary.artifact.size_bytes,
            summary.elapsed_ms
        );
        Ok(summary)
    }

    /// Step through the sequence, returning the number of captured frames
    /// and of held layer loads.
    async fn walk<S, A>(
        &self,
        run: &mut RunGuard<'_, S>,
        accumulator: &mut A,
        policy: LoadFailurePolicy,
    ) -> LayerloomResult<(u32, usize)>
    where
        S: RenderSurface,
        A: FrameAccumulator + ?Sized,
    {
        let mut frames = 0u32;
        let mut held_loads = 0usize;
        loop {
            let request = match run.sequence().map(|s| s.next_request()).transpose()? {
                Some(Some(request)) => request,
                _ => break,
            };
            let frame = request.index;
            run.arm_frame(frame, request.sources.len());

            // Every load for the frame is in flight before the first completion is looked at.
            let mut pending = request
                .sources
                .into_iter()
                .map(|(slot, source)| run.request_load(slot, source))
                .collect::<LayerloomResult<FuturesUnordered<LoadTask>>>()?;

            let mut drawn = false;
            while let Some(outcome) = pending.next().await {
                let slot = outcome.slot;
                let ok = match run.apply_outcome(outcome) {
                    Ok(_) => true,
                    Err(e) => match policy {
                        LoadFailurePolicy::Hold => {
                            tracing::warn!("frame {}: keeping previous image ({})", frame, e);
                            held_loads += 1;
                            false
                        }
                        LoadFailurePolicy::Abort => {
                            tracing::error!("frame {}: aborting export ({})", frame, e);
                            return Err(e);
                        }
                    },
                };
                self.emit(DriverEvent::LoadCompleted { frame, slot, ok });

                if run.record_completion()? == SyncTransition::Ready {
                    self.capture(run, accumulator, frame)?;
                    drawn = true;
                }
            }
            if !drawn {
                return Err(LayerloomError::Other(format!(
                    "frame {} finished loading without becoming ready",
                    frame
                )));
            }

            frames += 1;
            if let Some(sequence) = run.sequence_mut() {
                sequence.advance();
            }
        }
        Ok((frames, held_loads))
    }

    fn capture<S, A>(
        &self,
        run: &mut RunGuard<'_, S>,
        accumulator: &mut A,
        frame: u32,
    ) -> LayerloomResult<()>
    where
        S: RenderSurface,
        A: FrameAccumulator + ?Sized,
    {
        run.redraw()?;
        self.emit(DriverEvent::FrameDrawn { frame });
        let capture = run.snapshot()?;
        accumulator.add_frame(capture)?;
        tracing::debug!("captured frame {}", frame);
        Ok(())
    }
}
