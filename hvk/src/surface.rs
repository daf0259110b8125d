use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::instance::Instance;

#[derive(Debug, Error)]
pub enum CreateSurfaceError {
    #[error("Couldn't get display handle: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Couldn't get window handle: {0}")]
    InvalidWindowHandle(raw_window_handle::HandleError),
    #[error("Vulkan surface creation failed: {0}")]
    VulkanError(vk::Result),
    #[error(
        "Parent instance did not have the surface extensions \
         for this platform loaded"
    )]
    MissingExtension,
}

#[derive(Debug, Error)]
pub enum SurfaceSupportError {
    #[error("Surface extension is not loaded")]
    ExtensionNotLoaded,
    #[error("Vulkan error checking surface support: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum SurfaceQueryError {
    #[error("Surface extension is not loaded")]
    ExtensionNotLoaded,
    #[error("Vulkan error querying surface: {0}")]
    Vulkan(vk::Result),
}

/// Snapshot of what a surface supports on one physical device. A swapchain is
/// built from exactly one of these and goes stale with it.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// A `VkSurfaceKHR` bound to one window. Keeps both its instance and its
/// window source alive.
pub struct Surface<T: HasWindowHandle + HasDisplayHandle> {
    parent_instance: Arc<Instance>,
    handle: vk::SurfaceKHR,
    _surface_source: Arc<T>,
}

impl<T: HasWindowHandle + HasDisplayHandle> std::fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("handle", &self.handle)
            .field("parent", &self.parent_instance)
            .finish_non_exhaustive()
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Surface<T> {
    /// Creates a new surface associated with the source.
    ///
    /// # Safety
    /// Callers are responsible for ensuring no in-flight GPU work still
    /// references resources derived from this surface at destruction time.
    pub unsafe fn new(
        instance: &Arc<Instance>,
        source: Arc<T>,
    ) -> Result<Self, CreateSurfaceError> {
        //SAFETY: We hold Arc references to the instance and source, ensuring
        //they outlive the surface
        let handle = unsafe { instance.create_raw_surface(&*source) }?;
        tracing::debug!("Created surface {:?}", handle);

        Ok(Self {
            parent_instance: Arc::clone(instance),
            handle,
            _surface_source: source,
        })
    }

    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.parent_instance
    }

    pub fn raw_handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Check if a queue family on a physical device can present to this
    /// surface.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from the same instance
    /// as this surface.
    pub unsafe fn supports_queue_family(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool, SurfaceSupportError> {
        //SAFETY: caller guarantees physical_device provenance, self.handle is
        //valid
        unsafe {
            self.parent_instance.get_raw_physical_device_surface_support(
                physical_device,
                queue_family_index,
                self.handle,
            )
        }
    }

    /// Query capabilities, formats and present modes in one go.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from the same
    /// instance as this surface.
    pub unsafe fn query_support(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<SurfaceSupport, SurfaceQueryError> {
        let instance = &self.parent_instance;
        // SAFETY: Caller guarantees physical_device provenance for this
        // instance.
        let capabilities =
            unsafe { instance.get_surface_capabilities(physical_device, self.handle) }?;
        // SAFETY: same as above.
        let formats = unsafe { instance.get_surface_formats(physical_device, self.handle) }?;
        // SAFETY: same as above.
        let present_modes =
            unsafe { instance.get_surface_present_modes(physical_device, self.handle) }?;

        Ok(SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        })
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Drop for Surface<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping surface {:?}", self.handle);
        //SAFETY: This is being dropped which means all derived objects should
        //also be being dropped and no in-flight work may still reference it.
        let _ = unsafe { self.parent_instance.destroy_raw_surface(self.handle) }
            .inspect_err(|e| {
                tracing::error!("Error while dropping surface {:?}: {e}", self.handle)
            });
    }
}
