//! The per-frame state machine.
//!
//! [`FrameLoop::draw_frame`] runs one acquire, record, submit, present pass
//! against a [`FrameBackend`] and decides when the swapchain has to be rebuilt.
//! The backend does the Vulkan work. In production it is
//! [`Renderer`](crate::renderer::Renderer).
//!
//! Swapchain results are handled as follows:
//! - acquire `OUT_OF_DATE`: rebuild and skip the frame, nothing is presented.
//! - acquire `SUBOPTIMAL`: carry on, rebuild after presenting.
//! - present `SUBOPTIMAL`: rebuild after presenting.
//! - present `OUT_OF_DATE`: rebuild, and the frame counts as skipped.
//! - a pending resize notification: rebuild after presenting.
//!
//! Everything else is fatal and returned as a [`FrameError`].

use ash::vk;
use thiserror::Error;

use crate::window::{WindowSource, wait_for_nonzero_framebuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStage {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing reached the screen. The swapchain was out of date on acquire
    /// or on present.
    Skipped,
    Presented { recreated: bool },
}

#[derive(Debug, Error)]
pub enum FrameError<E> {
    #[error("Failed to acquire swapchain image: {0}")]
    Acquire(#[source] E),
    #[error("Failed to record frame commands: {0}")]
    Record(#[source] E),
    #[error("Failed to submit frame: {0}")]
    Submit(#[source] E),
    #[error("Failed to present frame: {0}")]
    Present(#[source] E),
    #[error("Failed to recreate swapchain: {0}")]
    Recreate(#[source] E),
}

/// The Vulkan work of one frame, split at the points where
/// [`FrameLoop`] makes decisions.
pub trait FrameBackend {
    type Error;

    /// Acquire the next image, signalling the image-available semaphore.
    fn acquire(&mut self) -> Result<AcquireOutcome, Self::Error>;

    /// Reset and re-record the command buffer of `image_index`.
    fn record(&mut self, image_index: u32) -> Result<(), Self::Error>;

    /// Submit the recorded buffer and block until the GPU has finished it.
    fn submit_and_wait(&mut self, image_index: u32) -> Result<(), Self::Error>;

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome, Self::Error>;

    /// Tear down and rebuild everything that depends on the swapchain.
    fn recreate(&mut self, extent: vk::Extent2D) -> Result<(), Self::Error>;
}

#[derive(Debug)]
pub struct FrameLoop<B: FrameBackend> {
    backend: B,
    stage: FrameStage,
    resize_pending: bool,
    frames_presented: u64,
}

impl<B: FrameBackend> FrameLoop<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            stage: FrameStage::Idle,
            resize_pending: false,
            frames_presented: 0,
        }
    }

    /// Request a swapchain rebuild at the end of the next presented frame.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Stage of the frame in progress. After a fatal error this is the stage
    /// that failed.
    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    fn enter(&mut self, stage: FrameStage) {
        tracing::trace!("Frame stage {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    pub fn draw_frame(
        &mut self,
        window: &mut dyn WindowSource,
    ) -> Result<FrameOutcome, FrameError<B::Error>> {
        self.enter(FrameStage::Acquiring);
        let (image_index, acquire_suboptimal) =
            match self.backend.acquire().map_err(FrameError::Acquire)? {
                AcquireOutcome::Ready {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    tracing::warn!("Swapchain out of date on acquire, skipping frame");
                    self.recreate(window)?;
                    self.enter(FrameStage::Idle);
                    return Ok(FrameOutcome::Skipped);
                }
            };
        if acquire_suboptimal {
            tracing::warn!("Swapchain suboptimal on acquire of image {image_index}");
        }

        self.enter(FrameStage::Recording);
        self.backend
            .record(image_index)
            .map_err(FrameError::Record)?;

        self.enter(FrameStage::Submitted);
        self.backend
            .submit_and_wait(image_index)
            .map_err(FrameError::Submit)?;

        self.enter(FrameStage::Presenting);
        let presented = self
            .backend
            .present(image_index)
            .map_err(FrameError::Present)?;

        let stale = match presented {
            PresentOutcome::Presented => false,
            PresentOutcome::Suboptimal => {
                tracing::warn!("Swapchain suboptimal on present");
                true
            }
            PresentOutcome::OutOfDate => {
                tracing::warn!("Swapchain out of date on present, frame dropped");
                self.recreate(window)?;
                self.enter(FrameStage::Idle);
                return Ok(FrameOutcome::Skipped);
            }
        };
        self.frames_presented += 1;

        let recreated = if stale || acquire_suboptimal || self.resize_pending {
            self.recreate(window)?
        } else {
            false
        };

        self.enter(FrameStage::Idle);
        Ok(FrameOutcome::Presented { recreated })
    }

    /// Returns false if the window started closing while minimized, in which
    /// case nothing was rebuilt and the resize flag stays set.
    fn recreate(&mut self, window: &mut dyn WindowSource) -> Result<bool, FrameError<B::Error>> {
        let Some(extent) = wait_for_nonzero_framebuffer(window) else {
            tracing::debug!("Window closing, not recreating swapchain");
            return Ok(false);
        };
        self.backend
            .recreate(extent)
            .map_err(FrameError::Recreate)?;
        self.resize_pending = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::window::tests::ScriptedWindow;

    #[derive(Debug, Error, PartialEq)]
    #[error("mock backend failure: {0}")]
    struct MockError(&'static str);

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Acquire,
        Record(u32),
        Submit(u32),
        Present(u32),
        Recreate(u32, u32),
    }

    /// Pops scripted results, falling back to success with image 0 when a
    /// script runs dry.
    #[derive(Default)]
    struct MockBackend {
        acquires: VecDeque<Result<AcquireOutcome, MockError>>,
        presents: VecDeque<Result<PresentOutcome, MockError>>,
        fail_record: bool,
        fail_submit: bool,
        fail_recreate: bool,
        calls: Vec<Call>,
    }

    impl FrameBackend for MockBackend {
        type Error = MockError;

        fn acquire(&mut self) -> Result<AcquireOutcome, MockError> {
            self.calls.push(Call::Acquire);
            self.acquires.pop_front().unwrap_or(Ok(AcquireOutcome::Ready {
                image_index: 0,
                suboptimal: false,
            }))
        }

        fn record(&mut self, image_index: u32) -> Result<(), MockError> {
            self.calls.push(Call::Record(image_index));
            if self.fail_record {
                Err(MockError("record"))
            } else {
                Ok(())
            }
        }

        fn submit_and_wait(&mut self, image_index: u32) -> Result<(), MockError> {
            self.calls.push(Call::Submit(image_index));
            if self.fail_submit {
                Err(MockError("fence wait"))
            } else {
                Ok(())
            }
        }

        fn present(&mut self, image_index: u32) -> Result<PresentOutcome, MockError> {
            self.calls.push(Call::Present(image_index));
            self.presents
                .pop_front()
                .unwrap_or(Ok(PresentOutcome::Presented))
        }

        fn recreate(&mut self, extent: vk::Extent2D) -> Result<(), MockError> {
            self.calls.push(Call::Recreate(extent.width, extent.height));
            if self.fail_recreate {
                Err(MockError("recreate"))
            } else {
                Ok(())
            }
        }
    }

    fn ready(image_index: u32) -> Result<AcquireOutcome, MockError> {
        Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal: false,
        })
    }

    #[test]
    fn plain_frame_runs_every_stage_once() {
        let backend = MockBackend {
            acquires: [ready(2)].into(),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(640, 480)]);

        let outcome = frames.draw_frame(&mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { recreated: false });
        assert_eq!(frames.stage(), FrameStage::Idle);
        assert_eq!(frames.frames_presented(), 1);
        assert_eq!(
            frames.backend().calls,
            vec![
                Call::Acquire,
                Call::Record(2),
                Call::Submit(2),
                Call::Present(2)
            ]
        );
    }

    #[test]
    fn out_of_date_acquire_skips_frame_then_next_proceeds() {
        let backend = MockBackend {
            acquires: [Ok(AcquireOutcome::OutOfDate), ready(1)].into(),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(800, 600)]);

        assert_eq!(
            frames.draw_frame(&mut window).unwrap(),
            FrameOutcome::Skipped
        );
        assert_eq!(
            frames.backend().calls,
            vec![Call::Acquire, Call::Recreate(800, 600)]
        );
        assert_eq!(frames.frames_presented(), 0);

        assert_eq!(
            frames.draw_frame(&mut window).unwrap(),
            FrameOutcome::Presented { recreated: false }
        );
        assert_eq!(
            frames.backend().calls[2..],
            [
                Call::Acquire,
                Call::Record(1),
                Call::Submit(1),
                Call::Present(1)
            ]
        );
    }

    #[test]
    fn suboptimal_present_is_shown_then_recreated() {
        let backend = MockBackend {
            presents: [Ok(PresentOutcome::Suboptimal)].into(),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(300, 200)]);

        let outcome = frames.draw_frame(&mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { recreated: true });
        assert_eq!(frames.frames_presented(), 1);
        let calls = &frames.backend().calls;
        assert_eq!(calls[calls.len() - 2..], [Call::Present(0), Call::Recreate(300, 200)]);

        frames.draw_frame(&mut window).unwrap();
        assert_eq!(frames.backend().calls[5], Call::Acquire);
    }

    #[test]
    fn out_of_date_present_recreates_and_is_not_counted() {
        let backend = MockBackend {
            presents: [Ok(PresentOutcome::OutOfDate)].into(),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(300, 200)]);

        assert_eq!(
            frames.draw_frame(&mut window).unwrap(),
            FrameOutcome::Skipped
        );
        assert_eq!(frames.frames_presented(), 0);
        assert_eq!(frames.stage(), FrameStage::Idle);
        assert_eq!(
            frames.backend().calls.last(),
            Some(&Call::Recreate(300, 200))
        );

        assert_eq!(
            frames.draw_frame(&mut window).unwrap(),
            FrameOutcome::Presented { recreated: false }
        );
        assert_eq!(frames.frames_presented(), 1);
    }

    #[test]
    fn suboptimal_acquire_renders_then_recreates() {
        let backend = MockBackend {
            acquires: [Ok(AcquireOutcome::Ready {
                image_index: 1,
                suboptimal: true,
            })]
            .into(),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(300, 200)]);

        assert_eq!(
            frames.draw_frame(&mut window).unwrap(),
            FrameOutcome::Presented { recreated: true }
        );
        assert_eq!(frames.backend().calls[3], Call::Present(1));
        assert_eq!(frames.backend().calls[4], Call::Recreate(300, 200));
    }

    #[test]
    fn resize_notification_recreates_once() {
        let mut frames = FrameLoop::new(MockBackend::default());
        let mut window = ScriptedWindow::new(&[(1280, 720)]);

        frames.notify_resized();
        assert!(frames.resize_pending());
        assert_eq!(
            frames.draw_frame(&mut window).unwrap(),
            FrameOutcome::Presented { recreated: true }
        );
        assert!(!frames.resize_pending());
        assert_eq!(
            frames.draw_frame(&mut window).unwrap(),
            FrameOutcome::Presented { recreated: false }
        );
    }

    #[test]
    fn recreate_waits_for_minimized_window() {
        let mut frames = FrameLoop::new(MockBackend::default());
        let mut window = ScriptedWindow::new(&[(0, 0), (0, 0), (1920, 1080)]);

        frames.notify_resized();
        frames.draw_frame(&mut window).unwrap();

        assert_eq!(window.waits, 2);
        assert_eq!(
            frames.backend().calls.last(),
            Some(&Call::Recreate(1920, 1080))
        );
    }

    #[test]
    fn closing_while_minimized_keeps_resize_pending() {
        let mut frames = FrameLoop::new(MockBackend::default());
        let mut window = ScriptedWindow::new(&[(0, 0)]);
        window.close_after_waits = Some(1);

        frames.notify_resized();
        assert_eq!(
            frames.draw_frame(&mut window).unwrap(),
            FrameOutcome::Presented { recreated: false }
        );
        assert!(frames.resize_pending());
        assert!(
            !frames
                .backend()
                .calls
                .iter()
                .any(|c| matches!(c, Call::Recreate(..)))
        );
    }

    #[test]
    fn acquire_error_is_fatal() {
        let backend = MockBackend {
            acquires: [Err(MockError("device lost"))].into(),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(1, 1)]);

        let err = frames.draw_frame(&mut window).unwrap_err();
        assert!(matches!(err, FrameError::Acquire(MockError("device lost"))));
        assert_eq!(frames.stage(), FrameStage::Acquiring);
        assert_eq!(frames.backend().calls, vec![Call::Acquire]);
    }

    #[test]
    fn record_error_stops_before_submit() {
        let backend = MockBackend {
            fail_record: true,
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(1, 1)]);

        let err = frames.draw_frame(&mut window).unwrap_err();
        assert!(matches!(err, FrameError::Record(_)));
        assert_eq!(frames.stage(), FrameStage::Recording);
        assert_eq!(
            frames.backend().calls,
            vec![Call::Acquire, Call::Record(0)]
        );
    }

    #[test]
    fn submit_error_stops_before_present() {
        let backend = MockBackend {
            fail_submit: true,
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(1, 1)]);

        let err = frames.draw_frame(&mut window).unwrap_err();
        assert!(matches!(err, FrameError::Submit(MockError("fence wait"))));
        assert_eq!(frames.stage(), FrameStage::Submitted);
        assert_eq!(
            frames.backend().calls,
            vec![Call::Acquire, Call::Record(0), Call::Submit(0)]
        );
        assert_eq!(frames.frames_presented(), 0);
    }

    #[test]
    fn recreate_error_is_fatal_and_keeps_resize_pending() {
        let backend = MockBackend {
            fail_recreate: true,
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(640, 480)]);

        frames.notify_resized();
        let err = frames.draw_frame(&mut window).unwrap_err();
        assert!(matches!(err, FrameError::Recreate(MockError("recreate"))));
        assert!(frames.resize_pending());
        assert_eq!(
            frames.backend().calls.last(),
            Some(&Call::Recreate(640, 480))
        );
    }

    #[test]
    fn recreate_error_after_out_of_date_acquire_is_fatal() {
        let backend = MockBackend {
            acquires: [Ok(AcquireOutcome::OutOfDate)].into(),
            fail_recreate: true,
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(640, 480)]);

        let err = frames.draw_frame(&mut window).unwrap_err();
        assert!(matches!(err, FrameError::Recreate(_)));
        assert_eq!(
            frames.backend().calls,
            vec![Call::Acquire, Call::Recreate(640, 480)]
        );
    }

    #[test]
    fn present_error_is_fatal() {
        let backend = MockBackend {
            presents: [Err(MockError("surface lost"))].into(),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(backend);
        let mut window = ScriptedWindow::new(&[(1, 1)]);

        let err = frames.draw_frame(&mut window).unwrap_err();
        assert!(matches!(err, FrameError::Present(MockError("surface lost"))));
        assert_eq!(frames.frames_presented(), 0);
    }
}
