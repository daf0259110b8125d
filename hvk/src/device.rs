//! Physical device selection and the logical [`Device`].
//!
//! Selection is split in two. [`Device::create_compatible`] gathers a
//! [`DeviceCandidate`] per enumerated physical device. Then
//! [`select_device`], a pure function, picks the first candidate that
//! supports every required extension and exposes both a graphics family and a
//! present family. There is no scoring, so given the same hardware the same
//! device and family indices are picked every run.

use std::ffi::{CStr, CString};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::{
    instance::{FetchPhysicalDeviceError, Instance, VkVersion},
    surface::{Surface, SurfaceSupportError},
    swapchain::CreateSwapchainError,
};

pub struct Device {
    parent: Arc<Instance>,
    handle: ash::Device,
    swapchain_device: Option<ash::khr::swapchain::Device>,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    swapchain_name_counter: AtomicU64,
    physical_device: vk::PhysicalDevice,
    device_name: String,
    graphics_queue: (vk::Queue, u32),
    present_queue: (vk::Queue, u32),
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .field("name", &self.device_name)
            .field("graphics_family", &self.graphics_queue.1)
            .field("present_family", &self.present_queue.1)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        //SAFETY: All objects derived from this device hold an Arc to it, so
        //they are gone by the time this runs.
        unsafe { self.handle.destroy_device(None) };
    }
}

#[derive(Debug, Error)]
pub enum CreateCompatibleError {
    #[error(
        "Mismatched parameters to Device::create_compatible. All \
         parameters must be derived from the same instance"
    )]
    MismatchedParams,

    #[error("Host memory exhaustion while creating a compatible device")]
    MemoryExhaustion,

    #[error("Unknown Vulkan error while creating a compatible device: {0}")]
    UnknownVulkan(vk::Result),

    #[error("No suitable physical device found")]
    NoSuitableDevice,

    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),
}

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error("Debug utils extension is not enabled on this device")]
    DebugUtilsNotEnabled,

    #[error("Vulkan error setting object name: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device extensions every candidate must support. All are enabled on
    /// the created device.
    pub required_extensions: Vec<&'static CStr>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            required_extensions: vec![ash::khr::swapchain::NAME],
        }
    }
}

impl DeviceConfig {
    fn wants_swapchain(&self) -> bool {
        self.required_extensions.contains(&ash::khr::swapchain::NAME)
    }
}

// ---- Selection ----

/// Capability bits of one queue family that selection cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueFamilyCaps {
    pub graphics: bool,
    pub present: bool,
}

/// Everything selection needs to know about one physical device.
///
/// `queue_families` is only filled in for devices that have every required
/// extension, and stops at the first family that completes both slots.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub extensions: Vec<CString>,
    pub queue_families: Vec<QueueFamilyCaps>,
    /// Set when querying the device failed. Such a device is never selected.
    pub query_error: Option<String>,
}

/// Chosen graphics and present family indices. They may be equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry per distinct family, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelection {
    /// Index into the candidate list.
    pub index: usize,
    pub physical_device: vk::PhysicalDevice,
    pub families: QueueFamilies,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("No physical device supports the required extensions and queue families")]
pub struct NoSuitableDevice;

/// Two-slot scan over queue families. Each slot takes the index of every
/// family carrying its bit until both slots are filled, then the scan stops.
pub fn find_queue_families(families: &[QueueFamilyCaps]) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;

    for (idx, caps) in families.iter().enumerate() {
        let idx = idx as u32;
        if caps.graphics {
            graphics = Some(idx);
        }
        if caps.present {
            present = Some(idx);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }

    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

pub fn supports_extensions(available: &[CString], required: &[&CStr]) -> bool {
    required
        .iter()
        .all(|req| available.iter().any(|avail| avail.as_c_str() == *req))
}

/// Pick the first candidate, in enumeration order, that supports every
/// required extension and has both a graphics and a present family.
/// Candidates whose queries failed are passed over.
pub fn select_device(
    candidates: &[DeviceCandidate],
    required_extensions: &[&CStr],
) -> Result<DeviceSelection, NoSuitableDevice> {
    candidates
        .iter()
        .enumerate()
        .find_map(|(index, candidate)| {
            if let Some(e) = &candidate.query_error {
                tracing::debug!("Skipping {}: query failed: {e}", candidate.name);
                return None;
            }
            if !supports_extensions(&candidate.extensions, required_extensions) {
                tracing::debug!(
                    "Skipping {}: missing required device extensions",
                    candidate.name
                );
                return None;
            }
            let Some(families) = find_queue_families(&candidate.queue_families) else {
                tracing::debug!(
                    "Skipping {}: no graphics and present queue families",
                    candidate.name
                );
                return None;
            };
            Some(DeviceSelection {
                index,
                physical_device: candidate.handle,
                families,
            })
        })
        .ok_or(NoSuitableDevice)
}

impl Device {
    /// Select a physical device able to render to and present on `surf`, then
    /// create a logical device with one queue per distinct family.
    pub fn create_compatible<T: HasDisplayHandle + HasWindowHandle>(
        instance: &Arc<Instance>,
        surf: &Surface<T>,
        config: DeviceConfig,
    ) -> Result<Self, CreateCompatibleError> {
        if !Arc::ptr_eq(surf.get_parent(), instance) {
            return Err(CreateCompatibleError::MismatchedParams);
        }

        let candidates = gather_candidates(instance, surf, &config.required_extensions)?;
        let selection = select_device(&candidates, &config.required_extensions)
            .map_err(|NoSuitableDevice| CreateCompatibleError::NoSuitableDevice)?;
        let chosen = &candidates[selection.index];
        let physical_device = selection.physical_device;
        let families = selection.families;

        tracing::info!(
            "Selected physical device: {} (graphics family: {}, present family: {})",
            chosen.name,
            families.graphics,
            families.present
        );

        let priorities = [1.0_f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let ext_ptrs: Vec<*const std::ffi::c_char> = config
            .required_extensions
            .iter()
            .map(|e| e.as_ptr())
            .collect();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&ext_ptrs);

        //SAFETY: physical_device was derived from instance, device_create_info
        //and everything it points to lives until the end of this call
        let device = unsafe { instance.create_ash_device(physical_device, &device_create_info) }
            .map_err(CreateCompatibleError::DeviceCreationFailed)?;

        //SAFETY: device was just created with one queue in each of these
        //families
        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        //SAFETY: same as above
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        Ok(Self {
            parent: Arc::clone(instance),
            swapchain_device: config
                .wants_swapchain()
                .then(|| instance.create_swapchain_loader(&device)),
            debug_utils_device: instance.create_debug_utils_device_loader(&device),
            swapchain_name_counter: AtomicU64::new(0),
            handle: device,
            physical_device,
            device_name: chosen.name.clone(),
            graphics_queue: (graphics_queue, families.graphics),
            present_queue: (present_queue, families.present),
        })
    }

    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn get_physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn ash_handle(&self) -> &ash::Device {
        &self.handle
    }

    pub fn raw_handle(&self) -> vk::Device {
        self.handle.handle()
    }

    pub fn name(&self) -> &str {
        &self.device_name
    }

    pub fn queue_families(&self) -> QueueFamilies {
        QueueFamilies {
            graphics: self.graphics_queue.1,
            present: self.present_queue.1,
        }
    }

    pub fn raw_graphics_queue(&self) -> vk::Queue {
        self.graphics_queue.0
    }

    pub fn raw_present_queue(&self) -> vk::Queue {
        self.present_queue.0
    }

    /// Wait until all submitted work on this device has completed.
    ///
    /// Used for coarse transitions (swapchain teardown, shutdown), never on
    /// the per-frame path.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: `self.handle` is a valid logical device for the lifetime of
        // `self`, and this call has no additional pointer preconditions.
        unsafe { self.handle.device_wait_idle() }
    }
}

fn gather_candidates<T: HasDisplayHandle + HasWindowHandle>(
    instance: &Instance,
    surf: &Surface<T>,
    required_extensions: &[&CStr],
) -> Result<Vec<DeviceCandidate>, CreateCompatibleError> {
    let physical_devices = instance.fetch_raw_physical_devices()?;
    let mut candidates = Vec::with_capacity(physical_devices.len());

    for handle in physical_devices {
        //SAFETY: handle was enumerated from instance
        let props = unsafe { instance.get_raw_physical_device_properties(handle) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("unknown"));
        tracing::info!(
            "Vulkan physical device: {} (API {}, type {:?})",
            name,
            VkVersion::from_raw(props.api_version),
            props.device_type
        );

        let mut candidate = DeviceCandidate {
            handle,
            name,
            extensions: Vec::new(),
            queue_families: Vec::new(),
            query_error: None,
        };

        //SAFETY: handle was enumerated from instance
        match unsafe { instance.enumerate_raw_device_extension_properties(handle) } {
            Ok(ext_props) => {
                candidate.extensions = ext_props
                    .iter()
                    .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
                    .collect();
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to enumerate extensions of {}: {e}",
                    candidate.name
                );
                candidate.query_error = Some(format!("enumerating extensions: {e}"));
                candidates.push(candidate);
                continue;
            }
        }

        if supports_extensions(&candidate.extensions, required_extensions)
            && let Err(e) = query_queue_families(instance, surf, &mut candidate)
        {
            tracing::warn!(
                "Failed to check surface support on {}: {e}",
                candidate.name
            );
            candidate.query_error = Some(format!("checking surface support: {e}"));
        }
        candidates.push(candidate);
    }

    Ok(candidates)
}

/// Fill in `candidate.queue_families` up to the first family that completes
/// both the graphics and the present slot.
fn query_queue_families<T: HasDisplayHandle + HasWindowHandle>(
    instance: &Instance,
    surf: &Surface<T>,
    candidate: &mut DeviceCandidate,
) -> Result<(), SurfaceSupportError> {
    //SAFETY: candidate.handle was enumerated from instance
    let family_props =
        unsafe { instance.get_raw_physical_device_queue_family_properties(candidate.handle) };
    let (mut graphics, mut present) = (false, false);
    for (idx, family) in family_props.iter().enumerate() {
        //SAFETY: candidate.handle and surf come from the same instance
        //(checked by the caller)
        let supports_present =
            unsafe { surf.supports_queue_family(candidate.handle, idx as u32) }?;
        let caps = QueueFamilyCaps {
            graphics: family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present: supports_present,
        };
        graphics |= caps.graphics;
        present |= caps.present;
        candidate.queue_families.push(caps);
        if graphics && present {
            break;
        }
    }
    Ok(())
}

impl From<FetchPhysicalDeviceError> for CreateCompatibleError {
    fn from(value: FetchPhysicalDeviceError) -> Self {
        match value {
            FetchPhysicalDeviceError::MemoryExhaustion => Self::MemoryExhaustion,
            FetchPhysicalDeviceError::UnknownVulkan(e) => Self::UnknownVulkan(e),
        }
    }
}

//Swapchain functionality
impl Device {
    /// # Safety
    /// `create_info` must reference valid Vulkan objects derived from this
    /// device and its parent instance. Any referenced pointers must remain
    /// valid for the duration of the call.
    pub unsafe fn create_raw_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR, CreateSwapchainError> {
        let swapchain_device = self
            .swapchain_device
            .as_ref()
            .ok_or(CreateSwapchainError::SwapchainNotEnabled)?;
        // SAFETY: Caller guarantees create_info validity and handle provenance.
        unsafe { swapchain_device.create_swapchain(create_info, None) }
            .map_err(CreateSwapchainError::VulkanCreate)
    }

    /// # Safety
    /// `swapchain` must be a valid swapchain handle created from this device
    /// and not yet destroyed.
    pub unsafe fn get_raw_swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> Result<Vec<vk::Image>, CreateSwapchainError> {
        let swapchain_device = self
            .swapchain_device
            .as_ref()
            .ok_or(CreateSwapchainError::SwapchainNotEnabled)?;
        // SAFETY: Caller guarantees swapchain validity and lifetime.
        unsafe { swapchain_device.get_swapchain_images(swapchain) }
            .map_err(CreateSwapchainError::VulkanGetImages)
    }

    /// # Safety
    /// `swapchain` must be a valid handle derived from this device, and all
    /// child resources derived from it must be destroyed first.
    ///
    /// No in-flight GPU work may still reference the swapchain.
    pub unsafe fn destroy_raw_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Some(swapchain_device) = self.swapchain_device.as_ref() {
            // SAFETY: Caller guarantees swapchain provenance and drop ordering.
            unsafe { swapchain_device.destroy_swapchain(swapchain, None) };
        }
    }

    /// Acquire the next presentable image.
    ///
    /// Returns `(image_index, suboptimal)`. An out-of-date swapchain comes
    /// back as `Err(vk::Result::ERROR_OUT_OF_DATE_KHR)`.
    ///
    /// # Safety
    /// `swapchain` must be a valid swapchain created from this device.
    /// `semaphore` and `fence`, when not null, must be valid unsignaled handles
    /// created from this device with no pending signal operation.
    pub unsafe fn acquire_next_swapchain_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), vk::Result> {
        let swapchain_device = self
            .swapchain_device
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        // SAFETY: Caller guarantees handle validity and sync object state.
        unsafe { swapchain_device.acquire_next_image(swapchain, timeout_ns, semaphore, fence) }
    }

    /// Queue a present on the present queue.
    ///
    /// Returns `Ok(true)` when the swapchain is suboptimal.
    ///
    /// # Safety
    /// Every handle in `present_info` must be valid and derived from this
    /// device, and each listed image index must currently be acquired.
    pub unsafe fn queue_present(
        &self,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> Result<bool, vk::Result> {
        let swapchain_device = self
            .swapchain_device
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        // SAFETY: Caller guarantees present_info validity.
        unsafe { swapchain_device.queue_present(self.present_queue.0, present_info) }
    }

    /// # Safety
    /// `create_info` must reference valid Vulkan objects derived from this
    /// device.
    pub unsafe fn create_raw_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        // SAFETY: Caller guarantees create_info validity and provenance.
        unsafe { self.handle.create_image_view(create_info, None) }
    }

    /// # Safety
    /// `image_view` must be a valid handle derived from this device, and all
    /// objects using it must be destroyed first.
    pub unsafe fn destroy_raw_image_view(&self, image_view: vk::ImageView) {
        // SAFETY: Caller guarantees image_view provenance and drop ordering.
        unsafe { self.handle.destroy_image_view(image_view, None) };
    }

    pub fn has_swapchain_support(&self) -> bool {
        self.swapchain_device.is_some()
    }

    pub(crate) fn next_swapchain_debug_index(&self) -> u64 {
        self.swapchain_name_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// Render pass and framebuffer functionality
impl Device {
    /// # Safety
    /// `create_info` and the attachment, subpass and dependency arrays it
    /// points to must be valid for the duration of the call.
    pub unsafe fn create_raw_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_render_pass(create_info, None) }
    }

    /// # Safety
    /// `render_pass` must be a valid handle created from this device. Every
    /// framebuffer built against it must already be destroyed.
    pub unsafe fn destroy_raw_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: Caller guarantees render_pass provenance and drop ordering.
        unsafe { self.handle.destroy_render_pass(render_pass, None) };
    }

    /// # Safety
    /// The render pass and attachments named by `create_info` must be valid
    /// handles created from this device.
    pub unsafe fn create_raw_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_framebuffer(create_info, None) }
    }

    /// # Safety
    /// `framebuffer` must be a valid handle created from this device and no
    /// in-flight GPU work may reference it.
    pub unsafe fn destroy_raw_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: Caller guarantees framebuffer provenance and drop ordering.
        unsafe { self.handle.destroy_framebuffer(framebuffer, None) };
    }
}

// Command pool and command buffer functionality
impl Device {
    /// # Safety
    /// `create_info` must name a queue family index exposed by this device.
    pub unsafe fn create_raw_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_command_pool(create_info, None) }
    }

    /// # Safety
    /// `pool` must be a valid handle created from this device. None of its
    /// command buffers may be pending execution.
    pub unsafe fn destroy_raw_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: Caller guarantees pool provenance and idle state.
        unsafe { self.handle.destroy_command_pool(pool, None) };
    }

    /// # Safety
    /// `allocate_info` must reference a valid pool created from this device,
    /// and the pool must be externally synchronized.
    pub unsafe fn allocate_raw_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        // SAFETY: Caller guarantees allocate_info validity.
        unsafe { self.handle.allocate_command_buffers(allocate_info) }
    }

    /// # Safety
    /// Every buffer must have been allocated from `pool` and none may be
    /// pending execution.
    pub unsafe fn free_raw_command_buffers(
        &self,
        pool: vk::CommandPool,
        buffers: &[vk::CommandBuffer],
    ) {
        // SAFETY: Caller guarantees provenance and idle state.
        unsafe { self.handle.free_command_buffers(pool, buffers) };
    }

    /// # Safety
    /// `command_buffer` must not be pending execution and its pool must have
    /// been created with `RESET_COMMAND_BUFFER`.
    pub unsafe fn reset_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is resettable and idle.
        unsafe { self.handle.reset_command_buffer(command_buffer, flags) }
    }

    /// # Safety
    /// `command_buffer` must be in the initial state.
    pub unsafe fn begin_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is in the initial state.
        unsafe { self.handle.begin_command_buffer(command_buffer, begin_info) }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state.
    pub unsafe fn end_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is in the recording state.
        unsafe { self.handle.end_command_buffer(command_buffer) }
    }

    /// Record a legacy (non synchronization2) pipeline barrier carrying only
    /// image barriers.
    ///
    /// # Safety
    /// `command_buffer` must be recording and every image named by
    /// `image_barriers` must be a valid image owned by this device.
    pub unsafe fn cmd_image_barriers(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        // SAFETY: Caller guarantees recording state and barrier validity.
        unsafe {
            self.handle.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            )
        };
    }

    /// # Safety
    /// `command_buffer` must be recording outside a render pass and `image`
    /// must be in `layout`, which must be `GENERAL` or `TRANSFER_DST_OPTIMAL`.
    pub unsafe fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        // SAFETY: Caller guarantees recording state and image layout.
        unsafe {
            self.handle
                .cmd_clear_color_image(command_buffer, image, layout, color, ranges)
        };
    }

    /// Submit work to the graphics queue.
    ///
    /// # Safety
    /// Every handle referenced by `submits` must be valid and derived from
    /// this device. `fence`, when not null, must be unsignaled and not pending.
    pub unsafe fn submit_graphics(
        &self,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees submit validity. The graphics queue is only
        // touched from the thread driving the frame loop.
        unsafe { self.handle.queue_submit(self.graphics_queue.0, submits, fence) }
    }
}

// Sync object functionality
impl Device {
    /// # Safety
    /// `create_info` must be a valid fence create info.
    pub unsafe fn create_raw_fence(
        &self,
        create_info: &vk::FenceCreateInfo<'_>,
    ) -> Result<vk::Fence, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_fence(create_info, None) }
    }

    /// # Safety
    /// `fence` must be created from this device and not pending on any queue.
    pub unsafe fn destroy_raw_fence(&self, fence: vk::Fence) {
        // SAFETY: Caller guarantees provenance and idle state.
        unsafe { self.handle.destroy_fence(fence, None) };
    }

    /// # Safety
    /// Every fence must be a valid handle created from this device.
    pub unsafe fn wait_for_raw_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees fence validity.
        unsafe { self.handle.wait_for_fences(fences, wait_all, timeout_ns) }
    }

    /// # Safety
    /// No fence may be pending on a queue.
    pub unsafe fn reset_raw_fences(&self, fences: &[vk::Fence]) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees no fence is pending.
        unsafe { self.handle.reset_fences(fences) }
    }

    /// # Safety
    /// `create_info` must be a valid semaphore create info.
    pub unsafe fn create_raw_semaphore(
        &self,
        create_info: &vk::SemaphoreCreateInfo<'_>,
    ) -> Result<vk::Semaphore, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_semaphore(create_info, None) }
    }

    /// # Safety
    /// `semaphore` must be created from this device and no queue operation
    /// may still wait on or signal it.
    pub unsafe fn destroy_raw_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: Caller guarantees provenance and idle state.
        unsafe { self.handle.destroy_semaphore(semaphore, None) };
    }
}

//Debug naming functionality
impl Device {
    /// Set a Vulkan debug name for an object owned by this device.
    ///
    /// Passing `None` as the name is treated as a no-op.
    ///
    /// # Safety
    /// `object` must be a valid Vulkan handle created from this device (or a
    /// child object associated with this device).
    pub unsafe fn set_object_name<H>(
        &self,
        object: H,
        name: Option<&CStr>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let debug_utils = self
            .debug_utils_device
            .as_ref()
            .ok_or(NameObjectError::DebugUtilsNotEnabled)?;

        let Some(name) = name else {
            return Ok(());
        };

        let object_name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(name);

        // SAFETY: Caller guarantees object provenance and validity.
        unsafe { debug_utils.set_debug_utils_object_name(&object_name_info) }
            .map_err(NameObjectError::Vulkan)
    }

    /// Lazily set a Vulkan debug name. The closure only runs when
    /// `VK_EXT_debug_utils` is enabled.
    ///
    /// # Safety
    /// Same contract as [`set_object_name`](Self::set_object_name).
    pub unsafe fn set_object_name_with<H, F>(
        &self,
        object: H,
        name_provider: F,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
        F: FnOnce() -> Option<CString>,
    {
        if self.debug_utils_device.is_none() {
            return Err(NameObjectError::DebugUtilsNotEnabled);
        }

        let name = name_provider();
        // SAFETY: This method shares the same safety contract as set_object_name.
        unsafe { self.set_object_name(object, name.as_deref()) }
    }

    /// Name an object from UTF-8 text, logging failures instead of returning
    /// them.
    ///
    /// # Safety
    /// Same contract as [`set_object_name`](Self::set_object_name).
    pub unsafe fn name_object<H>(&self, object: H, name: impl FnOnce() -> String)
    where
        H: vk::Handle + Copy + std::fmt::Debug,
    {
        // SAFETY: forwarded from the caller.
        match unsafe { self.set_object_name_with(object, || CString::new(name()).ok()) } {
            Ok(()) | Err(NameObjectError::DebugUtilsNotEnabled) => {}
            Err(e) => tracing::warn!("Failed to name object {:?}: {e}", object),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const GRAPHICS: QueueFamilyCaps = QueueFamilyCaps {
        graphics: true,
        present: false,
    };
    const PRESENT: QueueFamilyCaps = QueueFamilyCaps {
        graphics: false,
        present: true,
    };
    const BOTH: QueueFamilyCaps = QueueFamilyCaps {
        graphics: true,
        present: true,
    };
    const NEITHER: QueueFamilyCaps = QueueFamilyCaps {
        graphics: false,
        present: false,
    };

    fn candidate(raw: u64, exts: &[&CStr], families: &[QueueFamilyCaps]) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu{raw}"),
            extensions: exts.iter().map(|e| (*e).to_owned()).collect(),
            queue_families: families.to_vec(),
            query_error: None,
        }
    }

    #[test]
    fn shared_family_yields_equal_indices() {
        let families = find_queue_families(&[NEITHER, BOTH, GRAPHICS]).unwrap();
        assert_eq!(
            families,
            QueueFamilies {
                graphics: 1,
                present: 1
            }
        );
        assert!(families.is_shared());
        assert_eq!(families.unique(), vec![1]);
    }

    #[test]
    fn split_families_are_both_kept() {
        let families = find_queue_families(&[GRAPHICS, PRESENT]).unwrap();
        assert_eq!(families.graphics, 0);
        assert_eq!(families.present, 1);
        assert_eq!(families.unique(), vec![0, 1]);
    }

    #[test]
    fn graphics_slot_tracks_last_family_seen_before_both_found() {
        let families = find_queue_families(&[GRAPHICS, GRAPHICS, PRESENT, BOTH]).unwrap();
        assert_eq!(families.graphics, 1);
        assert_eq!(families.present, 2);
    }

    #[test]
    fn missing_present_family_fails() {
        assert_eq!(find_queue_families(&[GRAPHICS, NEITHER]), None);
        assert_eq!(find_queue_families(&[]), None);
    }

    #[test]
    fn first_matching_device_wins() {
        let swapchain = ash::khr::swapchain::NAME;
        let candidates = [
            candidate(1, &[], &[BOTH]),
            candidate(2, &[swapchain], &[GRAPHICS]),
            candidate(3, &[swapchain], &[GRAPHICS, PRESENT]),
            candidate(4, &[swapchain], &[BOTH]),
        ];

        let selection = select_device(&candidates, &[swapchain]).unwrap();
        assert_eq!(selection.index, 2);
        assert_eq!(selection.physical_device, vk::PhysicalDevice::from_raw(3));
        assert_eq!(
            selection.families,
            QueueFamilies {
                graphics: 0,
                present: 1
            }
        );

        // Same inputs, same answer.
        assert_eq!(select_device(&candidates, &[swapchain]).unwrap(), selection);
    }

    #[test]
    fn failed_query_on_first_gpu_falls_through_to_next() {
        let swapchain = ash::khr::swapchain::NAME;
        let mut lost = candidate(1, &[swapchain], &[BOTH]);
        lost.query_error = Some("checking surface support: ERROR_SURFACE_LOST_KHR".into());
        let candidates = [lost, candidate(2, &[swapchain], &[GRAPHICS, PRESENT])];

        let selection = select_device(&candidates, &[swapchain]).unwrap();
        assert_eq!(selection.index, 1);
        assert_eq!(selection.physical_device, vk::PhysicalDevice::from_raw(2));
    }

    #[test]
    fn failed_query_on_only_gpu_is_no_suitable_device() {
        let mut lost = candidate(1, &[], &[]);
        lost.query_error = Some("enumerating extensions: ERROR_INITIALIZATION_FAILED".into());
        assert_eq!(select_device(&[lost], &[]), Err(NoSuitableDevice));
    }

    #[test]
    fn missing_extension_on_only_gpu_is_no_suitable_device() {
        let candidates = [candidate(1, &[c"VK_KHR_other"], &[BOTH])];
        assert_eq!(
            select_device(&candidates, &[ash::khr::swapchain::NAME]),
            Err(NoSuitableDevice)
        );
    }

    #[test]
    fn no_devices_is_no_suitable_device() {
        assert_eq!(select_device(&[], &[]), Err(NoSuitableDevice));
    }

    #[test]
    fn extension_check_requires_every_name() {
        let available = vec![c"A".to_owned(), c"B".to_owned()];
        assert!(supports_extensions(&available, &[c"A", c"B"]));
        assert!(supports_extensions(&available, &[]));
        assert!(!supports_extensions(&available, &[c"A", c"C"]));
    }

    #[test]
    fn default_config_requires_swapchain() {
        let config = DeviceConfig::default();
        assert_eq!(config.required_extensions, vec![ash::khr::swapchain::NAME]);
        assert!(config.wants_swapchain());
    }
}
