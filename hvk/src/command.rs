//! Command pool ownership and recording of the per-image clear.
//!
//! Recording goes through the [`CommandRecorder`] trait so the command
//! sequence produced by [`record_clear`] can be checked without a GPU.
//! [`DeviceRecorder`] is the implementation that forwards to a real
//! [`Device`].

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateCommandPoolError {
    #[error("Vulkan error creating command pool: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum AllocateCommandBufferError {
    #[error("Vulkan error allocating command buffers: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Vulkan error resetting command buffer: {0}")]
    Reset(vk::Result),
    #[error("Vulkan error beginning command buffer: {0}")]
    Begin(vk::Result),
    #[error("Vulkan error ending command buffer: {0}")]
    End(vk::Result),
}

/// Whole colour aspect, one mip, one layer.
pub const CLEAR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// An image layout transition together with the stages it orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Discards previous contents and makes the image writable by transfers.
pub const TO_TRANSFER_DST: LayoutTransition = LayoutTransition {
    old_layout: vk::ImageLayout::UNDEFINED,
    new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    src_access: vk::AccessFlags::MEMORY_READ,
    dst_access: vk::AccessFlags::TRANSFER_WRITE,
    src_stage: vk::PipelineStageFlags::TRANSFER,
    dst_stage: vk::PipelineStageFlags::TRANSFER,
};

/// Hands the cleared image to the presentation engine.
pub const TO_PRESENT: LayoutTransition = LayoutTransition {
    old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
    src_access: vk::AccessFlags::TRANSFER_WRITE,
    dst_access: vk::AccessFlags::MEMORY_READ,
    src_stage: vk::PipelineStageFlags::TRANSFER,
    dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
};

impl LayoutTransition {
    /// Barrier applying this transition to `image` with no queue family
    /// ownership transfer.
    pub fn barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(CLEAR_SUBRESOURCE)
    }
}

pub fn clear_color_value(color: [f32; 4]) -> vk::ClearColorValue {
    vk::ClearColorValue { float32: color }
}

/// The handful of commands the clear needs, in recording order.
pub trait CommandRecorder {
    fn reset(&mut self) -> Result<(), vk::Result>;
    fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> Result<(), vk::Result>;
    fn transition(&mut self, image: vk::Image, transition: &LayoutTransition);
    fn clear_color(&mut self, image: vk::Image, color: &vk::ClearColorValue);
    fn end(&mut self) -> Result<(), vk::Result>;
}

/// Record "clear `image` to `color` and leave it presentable".
///
/// The buffer is reset first, so it can be re-recorded every frame.
pub fn record_clear<R: CommandRecorder + ?Sized>(
    recorder: &mut R,
    image: vk::Image,
    color: [f32; 4],
) -> Result<(), RecordError> {
    recorder.reset().map_err(RecordError::Reset)?;
    recorder
        .begin(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)
        .map_err(RecordError::Begin)?;
    recorder.transition(image, &TO_TRANSFER_DST);
    recorder.clear_color(image, &clear_color_value(color));
    recorder.transition(image, &TO_PRESENT);
    recorder.end().map_err(RecordError::End)
}

/// [`CommandRecorder`] writing into one command buffer of a real device.
pub struct DeviceRecorder<'a> {
    device: &'a Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> DeviceRecorder<'a> {
    /// # Safety
    /// `command_buffer` must come from a pool created with
    /// `RESET_COMMAND_BUFFER` on `device` and must not be pending execution
    /// for as long as the recorder is used. Every image passed to the
    /// recorder must be a valid image owned by `device`.
    pub unsafe fn new(device: &'a Device, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            command_buffer,
        }
    }
}

impl CommandRecorder for DeviceRecorder<'_> {
    fn reset(&mut self) -> Result<(), vk::Result> {
        // SAFETY: DeviceRecorder::new guarantees the buffer is resettable and
        // idle.
        unsafe {
            self.device.reset_raw_command_buffer(
                self.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )
        }
    }

    fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        // SAFETY: record_clear resets the buffer before beginning it.
        unsafe {
            self.device
                .begin_raw_command_buffer(self.command_buffer, &begin_info)
        }
    }

    fn transition(&mut self, image: vk::Image, transition: &LayoutTransition) {
        let barriers = [transition.barrier(image)];
        // SAFETY: The buffer is recording and the image belongs to device per
        // DeviceRecorder::new.
        unsafe {
            self.device.cmd_image_barriers(
                self.command_buffer,
                transition.src_stage,
                transition.dst_stage,
                &barriers,
            )
        };
    }

    fn clear_color(&mut self, image: vk::Image, color: &vk::ClearColorValue) {
        // SAFETY: The preceding transition put the image in
        // TRANSFER_DST_OPTIMAL and no render pass is active.
        unsafe {
            self.device.cmd_clear_color_image(
                self.command_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                color,
                &[CLEAR_SUBRESOURCE],
            )
        };
    }

    fn end(&mut self) -> Result<(), vk::Result> {
        // SAFETY: The buffer is in the recording state.
        unsafe { self.device.end_raw_command_buffer(self.command_buffer) }
    }
}

// ---- CommandPool ----

/// An owned command pool whose buffers can be reset one at a time.
///
/// Pools require external synchronisation. Allocation and freeing take
/// `&mut self`, so the borrow checker provides it.
pub struct CommandPool {
    parent: Arc<Device>,
    handle: vk::CommandPool,
    queue_family: u32,
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("handle", &self.handle)
            .field("queue_family", &self.queue_family)
            .finish_non_exhaustive()
    }
}

impl CommandPool {
    pub fn new(
        device: &Arc<Device>,
        queue_family: u32,
        name: Option<&str>,
    ) -> Result<Self, CreateCommandPoolError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        // SAFETY: queue_family is one of the families the device was created
        // with.
        let handle = unsafe { device.create_raw_command_pool(&create_info) }
            .map_err(CreateCommandPoolError::Vulkan)?;

        if let Some(name) = name {
            // SAFETY: handle is a valid command pool created from device.
            unsafe { device.name_object(handle, || name.to_owned()) };
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            queue_family,
        })
    }

    /// Pool on the device's graphics family, which is where the clear is
    /// submitted.
    pub fn for_graphics(device: &Arc<Device>) -> Result<Self, CreateCommandPoolError> {
        Self::new(
            device,
            device.queue_families().graphics,
            Some("graphics command pool"),
        )
    }

    pub fn allocate_primary(
        &mut self,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, AllocateCommandBufferError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        // SAFETY: allocate_info references this pool and &mut self gives
        // exclusive access to it.
        unsafe { self.parent.allocate_raw_command_buffers(&allocate_info) }
            .map_err(AllocateCommandBufferError::Vulkan)
    }

    /// # Safety
    /// Every buffer must have been allocated from this pool and none may be
    /// pending execution.
    pub unsafe fn free(&mut self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        // SAFETY: Caller guarantees provenance and idle state.
        unsafe { self.parent.free_raw_command_buffers(self.handle, buffers) };
    }

    pub fn raw_handle(&self) -> vk::CommandPool {
        self.handle
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        tracing::debug!("Dropping command pool {:?}", self.handle);
        // SAFETY: Owners wait for the device to go idle first. Destroying the
        // pool frees every buffer still allocated from it.
        unsafe { self.parent.destroy_raw_command_pool(self.handle) };
    }
}

// ---- FrameCommands ----

/// One primary command buffer per swapchain image, indexed by image index.
#[derive(Debug)]
pub struct FrameCommands {
    pool: CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl FrameCommands {
    pub fn new(
        mut pool: CommandPool,
        image_count: usize,
    ) -> Result<Self, AllocateCommandBufferError> {
        let buffers = pool.allocate_primary(image_count as u32)?;
        Ok(Self { pool, buffers })
    }

    /// Match the buffer count to a new swapchain image count. Existing
    /// buffers are freed and a fresh set is allocated.
    ///
    /// # Safety
    /// None of the current buffers may be pending execution.
    pub unsafe fn resize(
        &mut self,
        image_count: usize,
    ) -> Result<(), AllocateCommandBufferError> {
        if image_count == self.buffers.len() {
            return Ok(());
        }
        let old = std::mem::take(&mut self.buffers);
        // SAFETY: Caller guarantees the buffers are idle. They all came from
        // self.pool.
        unsafe { self.pool.free(&old) };
        self.buffers = self.pool.allocate_primary(image_count as u32)?;
        tracing::debug!("Reallocated {} command buffers", self.buffers.len());
        Ok(())
    }

    pub fn get(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Reset,
        Begin(vk::CommandBufferUsageFlags),
        Transition(vk::Image, vk::ImageLayout, vk::ImageLayout),
        Clear(vk::Image, [f32; 4]),
        End,
    }

    #[derive(Default)]
    struct LoggingRecorder {
        calls: Vec<Call>,
        fail_begin: Option<vk::Result>,
    }

    impl CommandRecorder for LoggingRecorder {
        fn reset(&mut self) -> Result<(), vk::Result> {
            self.calls.push(Call::Reset);
            Ok(())
        }

        fn begin(&mut self, flags: vk::CommandBufferUsageFlags) -> Result<(), vk::Result> {
            self.calls.push(Call::Begin(flags));
            match self.fail_begin {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn transition(&mut self, image: vk::Image, transition: &LayoutTransition) {
            self.calls.push(Call::Transition(
                image,
                transition.old_layout,
                transition.new_layout,
            ));
        }

        fn clear_color(&mut self, image: vk::Image, color: &vk::ClearColorValue) {
            // SAFETY: record_clear always fills the float32 member.
            let rgba = unsafe { color.float32 };
            self.calls.push(Call::Clear(image, rgba));
        }

        fn end(&mut self) -> Result<(), vk::Result> {
            self.calls.push(Call::End);
            Ok(())
        }
    }

    #[test]
    fn clear_is_recorded_between_two_transitions() {
        let image = vk::Image::from_raw(0x42);
        let color = [0.0, 0.3, 0.6, 1.0];
        let mut rec = LoggingRecorder::default();

        record_clear(&mut rec, image, color).unwrap();

        assert_eq!(
            rec.calls,
            vec![
                Call::Reset,
                Call::Begin(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE),
                Call::Transition(
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL
                ),
                Call::Clear(image, color),
                Call::Transition(
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR
                ),
                Call::End,
            ]
        );
    }

    #[test]
    fn begin_failure_stops_recording() {
        let mut rec = LoggingRecorder {
            fail_begin: Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            ..Default::default()
        };
        let err = record_clear(&mut rec, vk::Image::from_raw(1), [1.0; 4]).unwrap_err();
        assert!(matches!(
            err,
            RecordError::Begin(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        ));
        assert_eq!(rec.calls.len(), 2);
    }

    #[test]
    fn transitions_chain_through_transfer_dst() {
        assert_eq!(TO_TRANSFER_DST.new_layout, TO_PRESENT.old_layout);
        assert_eq!(TO_TRANSFER_DST.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(TO_PRESENT.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(TO_PRESENT.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn barrier_covers_single_color_subresource() {
        let image = vk::Image::from_raw(7);
        let barrier = TO_PRESENT.barrier(image);
        assert_eq!(barrier.image, image);
        assert_eq!(barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(
            barrier.subresource_range.aspect_mask,
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(barrier.subresource_range.level_count, 1);
        assert_eq!(barrier.subresource_range.layer_count, 1);
    }
}
