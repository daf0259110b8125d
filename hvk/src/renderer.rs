//! [`Renderer`] owns every Vulkan object the clear-and-present loop needs and
//! implements [`FrameBackend`] on top of them.
//!
//! There is one renderer per window. It is an ordinary value owned by the
//! app, not a global.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::{
    command::{
        AllocateCommandBufferError, CommandPool, CreateCommandPoolError, DeviceRecorder,
        FrameCommands, RecordError, record_clear,
    },
    config::RendererConfig,
    device::{CreateCompatibleError, Device},
    frame::{AcquireOutcome, FrameBackend, PresentOutcome},
    instance::{Instance, InstanceCreationError, InstanceExtensions},
    surface::{CreateSurfaceError, Surface},
    swapchain::{CreateSwapchainError, Swapchain},
    sync::{CreateFrameSyncError, FrameSync, WaitFenceError},
};

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Failed to create Vulkan instance: {0}")]
    Instance(#[from] InstanceCreationError),
    #[error("Failed to create window surface: {0}")]
    Surface(#[from] CreateSurfaceError),
    #[error("Failed to create logical device: {0}")]
    Device(#[from] CreateCompatibleError),
    #[error("Failed to create swapchain: {0}")]
    Swapchain(#[from] CreateSwapchainError),
    #[error("Failed to create frame sync objects: {0}")]
    FrameSync(#[from] CreateFrameSyncError),
    #[error("Failed to create command pool: {0}")]
    CommandPool(#[from] CreateCommandPoolError),
    #[error("Failed to allocate command buffers: {0}")]
    CommandBuffers(#[from] AllocateCommandBufferError),
}

/// Errors from the Vulkan side of a single frame. [`FrameLoop`] wraps these
/// in a [`FrameError`] naming the stage.
///
/// [`FrameLoop`]: crate::frame::FrameLoop
/// [`FrameError`]: crate::frame::FrameError
#[derive(Debug, Error)]
pub enum RenderFrameError {
    #[error("No swapchain. A previous recreation failed")]
    NoSwapchain,
    #[error("Swapchain returned image index {0} which has no image or command buffer")]
    BadImageIndex(u32),
    #[error("Vulkan error acquiring image: {0}")]
    Acquire(vk::Result),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("Vulkan error resetting frame fence: {0}")]
    ResetFence(vk::Result),
    #[error("Vulkan error submitting to graphics queue: {0}")]
    Submit(vk::Result),
    #[error("Waiting for frame fence failed: {0}")]
    WaitFence(#[from] WaitFenceError),
    #[error("Vulkan error presenting: {0}")]
    Present(vk::Result),
    #[error("Vulkan error waiting for device idle: {0}")]
    WaitIdle(vk::Result),
    #[error(transparent)]
    Swapchain(#[from] CreateSwapchainError),
    #[error(transparent)]
    FrameSync(#[from] CreateFrameSyncError),
    #[error(transparent)]
    CommandBuffers(#[from] AllocateCommandBufferError),
}

/// Instance, surface, device, swapchain bundle, sync objects and command
/// buffers for one window.
///
/// Fields are declared in reverse creation order so they drop in that order:
/// the device goes before the surface, and the instance goes last.
pub struct Renderer<T: HasDisplayHandle + HasWindowHandle> {
    commands: FrameCommands,
    sync: FrameSync,
    swapchain: Option<Swapchain<T>>,
    device: Arc<Device>,
    surface: Arc<Surface<T>>,
    instance: Arc<Instance>,
    clear_color: [f32; 4],
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Renderer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("device", &self.device)
            .field("swapchain", &self.swapchain)
            .field("clear_color", &self.clear_color)
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Renderer<T> {
    /// Build the whole object graph for `window`, with a swapchain sized to
    /// `framebuffer_size`.
    ///
    /// # Safety
    /// Loads the system Vulkan library, which can run arbitrary code.
    pub unsafe fn new(
        config: &RendererConfig,
        window: Arc<T>,
        framebuffer_size: vk::Extent2D,
    ) -> Result<Self, RendererError> {
        // SAFETY: Forwarded to the caller.
        let instance = Arc::new(unsafe {
            Instance::new(
                &config.app_name,
                config.validation,
                Some(&*window),
                InstanceExtensions { surface: true },
            )
        }?);

        // SAFETY: The renderer waits for the device to idle before anything
        // derived from the surface is dropped.
        let surface = Arc::new(unsafe { Surface::new(&instance, window) }?);
        let device = Arc::new(Device::create_compatible(
            &instance,
            &surface,
            config.device.clone(),
        )?);

        let swapchain = Swapchain::new(&device, &surface, framebuffer_size)?;
        let sync = FrameSync::new(&device)?;
        let pool = CommandPool::for_graphics(&device)?;
        let commands = FrameCommands::new(pool, swapchain.image_count())?;

        Ok(Self {
            commands,
            sync,
            swapchain: Some(swapchain),
            device,
            surface,
            instance,
            clear_color: config.clear_color,
        })
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn swapchain(&self) -> Option<&Swapchain<T>> {
        self.swapchain.as_ref()
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Wait for the GPU, drop the swapchain bundle and build a new one at
    /// `extent`. The command buffer set follows the new image count.
    pub fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> Result<(), RenderFrameError> {
        let _span = tracing::debug_span!("recreate_swapchain").entered();
        self.device
            .wait_idle()
            .map_err(RenderFrameError::WaitIdle)?;

        drop(self.swapchain.take());
        let swapchain = Swapchain::new(&self.device, &self.surface, extent)?;

        // A present that came back out of date may have left
        // rendering_finished signaled.
        self.sync = FrameSync::new(&self.device)?;

        // SAFETY: The device is idle, so no command buffer is pending.
        unsafe { self.commands.resize(swapchain.image_count()) }?;
        self.swapchain = Some(swapchain);
        Ok(())
    }

    fn image_and_commands(
        &self,
        image_index: u32,
    ) -> Result<(vk::Image, vk::CommandBuffer), RenderFrameError> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(RenderFrameError::NoSwapchain)?;
        let image = swapchain
            .images()
            .get(image_index as usize)
            .copied()
            .ok_or(RenderFrameError::BadImageIndex(image_index))?;
        let command_buffer = self
            .commands
            .get(image_index)
            .ok_or(RenderFrameError::BadImageIndex(image_index))?;
        Ok((image, command_buffer))
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> FrameBackend for Renderer<T> {
    type Error = RenderFrameError;

    fn acquire(&mut self) -> Result<AcquireOutcome, RenderFrameError> {
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or(RenderFrameError::NoSwapchain)?;
        // SAFETY: image_available has no pending signal. Each successful
        // acquire is consumed by a submit that finished before its fence
        // wait returned, and a failed acquire signals nothing.
        let acquired =
            unsafe { swapchain.acquire_next_image(self.sync.image_available.raw_handle()) };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderFrameError::Acquire(e)),
        }
    }

    fn record(&mut self, image_index: u32) -> Result<(), RenderFrameError> {
        let (image, command_buffer) = self.image_and_commands(image_index)?;
        // SAFETY: command_buffer comes from a RESET_COMMAND_BUFFER pool on
        // self.device. The previous submit of it was waited on, so it is not
        // pending. image is a swapchain image of the same device.
        let mut recorder = unsafe { DeviceRecorder::new(&self.device, command_buffer) };
        record_clear(&mut recorder, image, self.clear_color)?;
        Ok(())
    }

    fn submit_and_wait(&mut self, image_index: u32) -> Result<(), RenderFrameError> {
        let (_, command_buffer) = self.image_and_commands(image_index)?;

        // SAFETY: Every submit is followed by a wait on this fence, so it is
        // never pending here.
        unsafe { self.sync.in_flight.reset() }.map_err(RenderFrameError::ResetFence)?;

        let wait_semaphores = [self.sync.image_available.raw_handle()];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let command_buffers = [command_buffer];
        let signal_semaphores = [self.sync.rendering_finished.raw_handle()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: All handles belong to self.device and the arrays outlive
        // the call. The fence was reset above.
        unsafe {
            self.device
                .submit_graphics(&[submit], self.sync.in_flight.raw_handle())
        }
        .map_err(RenderFrameError::Submit)?;

        self.sync.in_flight.wait(u64::MAX)?;
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome, RenderFrameError> {
        let rendering_finished = self.sync.rendering_finished.raw_handle();
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or(RenderFrameError::NoSwapchain)?;
        // SAFETY: image_index was acquired this frame, and the submit that
        // signals rendering_finished has been queued.
        match unsafe { swapchain.present(image_index, rendering_finished) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RenderFrameError::Present(e)),
        }
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> Result<(), RenderFrameError> {
        self.recreate_swapchain(extent)
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Drop for Renderer<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping renderer");
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("device_wait_idle failed during teardown: {e}");
        }
    }
}
