//! Minimal Vulkan clear-and-present renderer.
//!
//! Object hierarchy (each child holds an `Arc` of its parent):
//! `Instance` -> `Surface` / `Device` -> `Swapchain` (views, render pass,
//! framebuffers), `FrameSync`, `CommandPool`.
//!
//! `hvk` naming conventions:
//! - `raw_*` accessors return the Vulkan handle type from `ash::vk`.
//! - `ash_*` accessors return the corresponding `ash` wrapper object.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod command;
pub mod config;
pub mod device;
pub mod frame;
pub mod instance;
pub mod log;
pub mod render_pass;
pub mod renderer;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use ash;
pub use raw_window_handle::HandleError as RWHHandleError;
