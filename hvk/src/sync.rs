//! Fences and binary semaphores, plus the [`FrameSync`] set used by the frame
//! loop.
//!
//! Only one frame is ever in flight, so a single set of one fence and two
//! semaphores is enough. The CPU waits on the fence after every submit, which
//! means a command buffer is never rewritten while the GPU still reads it.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateFenceError {
    #[error("Vulkan error creating fence: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum WaitFenceError {
    #[error("Fence wait timed out")]
    Timeout,
    #[error("Vulkan error waiting for fence: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum CreateSemaphoreError {
    #[error("Vulkan error creating semaphore: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum CreateFrameSyncError {
    #[error("Failed to create frame semaphore: {0}")]
    Semaphore(#[from] CreateSemaphoreError),
    #[error("Failed to create frame fence: {0}")]
    Fence(#[from] CreateFenceError),
}

// ---- Fence ----

/// An owned binary fence used for CPU–GPU synchronisation.
pub struct Fence {
    parent: Arc<Device>,
    handle: vk::Fence,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Fence {
    /// Create an unsignaled fence.
    ///
    /// `name` is an optional debug label applied when `VK_EXT_debug_utils` is
    /// enabled.
    pub fn new(device: &Arc<Device>, name: Option<&str>) -> Result<Self, CreateFenceError> {
        let create_info = vk::FenceCreateInfo::default();

        // SAFETY: create_info is fully initialised with no borrowed pointers.
        let handle = unsafe { device.create_raw_fence(&create_info) }
            .map_err(CreateFenceError::Vulkan)?;

        if let Some(name) = name {
            // SAFETY: handle is a valid fence created from device.
            unsafe { device.name_object(handle, || name.to_owned()) };
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    /// Block until the fence is signaled or `timeout_ns` nanoseconds elapse.
    /// Pass `u64::MAX` to wait indefinitely.
    pub fn wait(&self, timeout_ns: u64) -> Result<(), WaitFenceError> {
        // SAFETY: handle is a valid fence created from parent.
        unsafe { self.parent.wait_for_raw_fences(&[self.handle], true, timeout_ns) }.map_err(
            |e| {
                if e == vk::Result::TIMEOUT {
                    WaitFenceError::Timeout
                } else {
                    WaitFenceError::Vulkan(e)
                }
            },
        )
    }

    /// Reset the fence to the unsignaled state.
    ///
    /// # Safety
    /// The fence must not be pending on any queue submission.
    pub unsafe fn reset(&mut self) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the fence is not pending.
        unsafe { self.parent.reset_raw_fences(&[self.handle]) }
    }

    pub fn raw_handle(&self) -> vk::Fence {
        self.handle
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        tracing::debug!("Dropping fence {:?}", self.handle);
        // SAFETY: handle was created from parent. Owners wait for the device
        // to go idle before dropping sync objects.
        unsafe { self.parent.destroy_raw_fence(self.handle) };
    }
}

// ---- Semaphore ----

/// An owned binary semaphore used for GPU–GPU ordering between queue
/// operations.
pub struct Semaphore {
    parent: Arc<Device>,
    handle: vk::Semaphore,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Semaphore {
    pub fn new(device: &Arc<Device>, name: Option<&str>) -> Result<Self, CreateSemaphoreError> {
        let create_info = vk::SemaphoreCreateInfo::default();

        // SAFETY: create_info is fully initialised with no borrowed pointers.
        let handle = unsafe { device.create_raw_semaphore(&create_info) }
            .map_err(CreateSemaphoreError::Vulkan)?;

        if let Some(name) = name {
            // SAFETY: handle is a valid semaphore created from device.
            unsafe { device.name_object(handle, || name.to_owned()) };
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    pub fn raw_handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        tracing::debug!("Dropping semaphore {:?}", self.handle);
        // SAFETY: handle was created from parent. Owners wait for the device
        // to go idle before dropping sync objects.
        unsafe { self.parent.destroy_raw_semaphore(self.handle) };
    }
}

// ---- FrameSync ----

/// The sync objects for the single frame in flight.
///
/// - `image_available` is signaled by acquire and waited on by submit.
/// - `rendering_finished` is signaled by submit and waited on by present.
/// - `in_flight` is signaled when the submit completes, and the CPU waits on
///   it before touching per-frame resources again.
#[derive(Debug)]
pub struct FrameSync {
    pub image_available: Semaphore,
    pub rendering_finished: Semaphore,
    pub in_flight: Fence,
}

impl FrameSync {
    /// All three objects start unsignaled.
    pub fn new(device: &Arc<Device>) -> Result<Self, CreateFrameSyncError> {
        Ok(Self {
            image_available: Semaphore::new(device, Some("image available"))?,
            rendering_finished: Semaphore::new(device, Some("rendering finished"))?,
            in_flight: Fence::new(device, Some("frame in flight"))?,
        })
    }
}
