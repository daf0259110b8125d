//! The renderer's view of a window.
//!
//! Nothing in `hvk` talks to a windowing library directly. The app adapts its
//! window to [`WindowSource`], and the surface is created from any
//! `HasDisplayHandle + HasWindowHandle` type.

use ash::vk;

pub trait WindowSource {
    /// Current drawable size in pixels. Either dimension is 0 while the
    /// window is minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until at least one window event has been processed.
    fn wait_events(&mut self);

    fn should_close(&self) -> bool;
}

/// Block until the window has a drawable area.
///
/// Returns `None` if the window is asked to close while waiting.
pub fn wait_for_nonzero_framebuffer(window: &mut dyn WindowSource) -> Option<vk::Extent2D> {
    let mut logged = false;
    loop {
        if window.should_close() {
            return None;
        }
        let (width, height) = window.framebuffer_size();
        if width != 0 && height != 0 {
            return Some(vk::Extent2D { width, height });
        }
        if !logged {
            tracing::debug!("Framebuffer is {width}x{height}, waiting for window events");
            logged = true;
        }
        window.wait_events();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Plays back a list of sizes, advancing one entry per `wait_events`.
    /// The last size sticks.
    pub(crate) struct ScriptedWindow {
        pub sizes: VecDeque<(u32, u32)>,
        pub waits: usize,
        pub close_after_waits: Option<usize>,
    }

    impl ScriptedWindow {
        pub fn new(sizes: &[(u32, u32)]) -> Self {
            Self {
                sizes: sizes.iter().copied().collect(),
                waits: 0,
                close_after_waits: None,
            }
        }
    }

    impl WindowSource for ScriptedWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.sizes.front().copied().unwrap_or((0, 0))
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if self.sizes.len() > 1 {
                self.sizes.pop_front();
            }
        }

        fn should_close(&self) -> bool {
            self.close_after_waits.is_some_and(|n| self.waits >= n)
        }
    }

    #[test]
    fn returns_immediately_when_visible() {
        let mut window = ScriptedWindow::new(&[(800, 600)]);
        let extent = wait_for_nonzero_framebuffer(&mut window);
        assert_eq!(
            extent,
            Some(vk::Extent2D {
                width: 800,
                height: 600
            })
        );
        assert_eq!(window.waits, 0);
    }

    #[test]
    fn minimized_window_blocks_until_restored() {
        let mut window = ScriptedWindow::new(&[(0, 0), (0, 0), (1024, 0), (1024, 768)]);
        let extent = wait_for_nonzero_framebuffer(&mut window);
        assert_eq!(
            extent,
            Some(vk::Extent2D {
                width: 1024,
                height: 768
            })
        );
        assert_eq!(window.waits, 3);
    }

    #[test]
    fn close_while_minimized_gives_up() {
        let mut window = ScriptedWindow::new(&[(0, 0)]);
        window.close_after_waits = Some(2);
        assert_eq!(wait_for_nonzero_framebuffer(&mut window), None);
        assert_eq!(window.waits, 2);
    }
}
