//! Vulkan instance creation, physical device queries and surface queries.
//!
//! [`Instance`] wraps an `ash::Instance` and owns the entry-point loader, an
//! optional debug messenger and the surface instance loader. Everything else
//! in the crate reaches Vulkan through it or through
//! [`Device`](crate::device::Device).

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::log::VulkanLogLevel;
use crate::surface::{CreateSurfaceError, SurfaceQueryError, SurfaceSupportError};
use std::{
    ffi::{CStr, CString},
    fmt::Debug,
    str::FromStr,
};

/// API version requested from the loader. Older loaders are rejected.
pub const REQUIRED_API_VERSION: u32 = vk::API_VERSION_1_3;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";
const DEBUG_MESSENGER_TARGET: &str = "hvk-debug-messenger";

/// A packed Vulkan API version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VkVersion(u32);

impl VkVersion {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(variant: u32, major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(variant, major, minor, patch))
    }

    pub fn variant(&self) -> u32 {
        vk::api_version_variant(self.0)
    }

    pub fn major(&self) -> u32 {
        vk::api_version_major(self.0)
    }
    pub fn minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }
    pub fn patch(&self) -> u32 {
        vk::api_version_patch(self.0)
    }

    /// True when `self` is at least `other`, ignoring the patch number.
    pub fn at_least(&self, other: VkVersion) -> bool {
        (self.major(), self.minor()) >= (other.major(), other.minor())
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VkVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// The root Vulkan object. Everything derived from it holds an
/// `Arc<Instance>`.
pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger:
        Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
    surface_instance: Option<ash::khr::surface::Instance>,
    ver: VkVersion,
}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .field("version", &self.ver)
            .field("debug_messenger", &self.debug_messenger.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreationError {
    #[error("Could not load Vulkan: {0}")]
    Loading(ash::LoadingError),
    #[error("Couldn't get display handle from passed value: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Missing mandatory instance extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("Vulkan {found} is available but {required} is required")]
    UnsupportedApiVersion { found: VkVersion, required: VkVersion },
    #[error("Unknown Vulkan Error {0}")]
    UnknownVulkan(vk::Result),
    #[error("Invalid app name was passed to Instance::new")]
    InvalidAppName,
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        if let Some((debug_messenger, debug_utils_instance)) =
            self.debug_messenger.take()
        {
            //SAFETY: last use of this debug messenger. We made this debug
            //messenger from this instance. debug_utils_instance is derived from
            //this instance
            unsafe {
                debug_utils_instance
                    .destroy_debug_utils_messenger(debug_messenger, None)
            };
        }
        //SAFETY: We are in drop so this is the last use of instance. Any given
        //derived object should be gone
        unsafe { self.handle.destroy_instance(None) };
    }
}

impl From<vk::Result> for InstanceCreationError {
    fn from(value: vk::Result) -> Self {
        InstanceCreationError::UnknownVulkan(value)
    }
}

fn message_type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    //SAFETY: Vulkan guarantees p_callback_data is valid for the duration of
    //the callback
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }
        .to_string_lossy();
    let type_str = message_type_label(message_type);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::trace!(target: DEBUG_MESSENGER_TARGET, "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: DEBUG_MESSENGER_TARGET, "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: DEBUG_MESSENGER_TARGET, "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: DEBUG_MESSENGER_TARGET, "[{}] {}", type_str, message);
        }
        _ => {
            tracing::debug!(target: DEBUG_MESSENGER_TARGET, "[{}] {}", type_str, message);
        }
    }

    vk::FALSE
}

/// Optional instance-level extensions for [`Instance::new`].
///
/// Set `surface` to request the platform surface extensions. A
/// `display_handle_source` must also be passed so the names can be
/// enumerated.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstanceExtensions {
    pub surface: bool,
}

impl Instance {
    /// Loads Vulkan and creates an instance targeting
    /// [`REQUIRED_API_VERSION`].
    ///
    /// When `max_log_level` is `Some` and both the Khronos validation layer
    /// and `VK_EXT_debug_utils` are available, validation is enabled and its
    /// messages are forwarded to `tracing`. Otherwise the instance is created
    /// without them.
    ///
    /// # Safety
    /// This loads the system Vulkan loader, meaning that there can be
    /// arbitrary code executed.
    pub unsafe fn new(
        app_name: impl AsRef<str>,
        max_log_level: Option<VulkanLogLevel>,
        display_handle_source: Option<&impl HasDisplayHandle>,
        enabled_exts: InstanceExtensions,
    ) -> Result<Self, InstanceCreationError> {
        use InstanceCreationError as Error;

        let app_name_cstring = match CString::from_str(app_name.as_ref()) {
            Ok(cstr) => cstr,
            Err(_) => Err(Error::InvalidAppName)?,
        };
        //SAFETY: We pass on the burden of the safety from loading dlls to the
        //caller. Entry outlives every object made from it since Instance owns
        //it and drops it last
        let entry = unsafe { ash::Entry::load() }.map_err(Error::Loading)?;

        //SAFETY: Basically always fine
        let loader_version = match unsafe { entry.try_enumerate_instance_version() }? {
            Some(ver) => VkVersion::from_raw(ver),
            None => VkVersion::from_raw(vk::API_VERSION_1_0),
        };
        tracing::info!("Vulkan loader version: {loader_version}");

        let required = VkVersion::from_raw(REQUIRED_API_VERSION);
        if !loader_version.at_least(required) {
            return Err(Error::UnsupportedApiVersion {
                found: loader_version,
                required,
            });
        }

        let mut mandatory_exts: Vec<&CStr> = Vec::with_capacity(8);

        if let Some(display_handle_source) = display_handle_source
            && enabled_exts.surface
        {
            let ash_window_exts = ash_window::enumerate_required_extensions(
                display_handle_source
                    .display_handle()
                    .map_err(Error::InvalidDisplayHandle)?
                    .as_raw(),
            )?;

            mandatory_exts.extend(
                ash_window_exts
                    .iter()
                    //SAFETY: ash_window hands back static null terminated
                    //extension names
                    .map(|ext_cstr_ptr| unsafe { CStr::from_ptr(*ext_cstr_ptr) }),
            );
        }

        //SAFETY: Pretty much always okay
        let instance_exts_avail =
            unsafe { entry.enumerate_instance_extension_properties(None) }?;
        //SAFETY: Pretty much always okay
        let instance_layers_avail = unsafe { entry.enumerate_instance_layer_properties() };

        let missing_exts: Vec<_> = mandatory_exts
            .iter()
            .filter(|mandatory_ext| {
                !instance_exts_avail
                    .iter()
                    .any(|avail| avail.extension_name_as_c_str() == Ok(**mandatory_ext))
            })
            .map(|ext| ext.to_string_lossy().into_owned())
            .collect();

        if !missing_exts.is_empty() {
            return Err(Error::MissingExtensions(missing_exts));
        }

        let debug_utils_ext_name = ash::ext::debug_utils::NAME;
        let debug_utils_available = instance_exts_avail
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(debug_utils_ext_name));

        let validation_layer_available = instance_layers_avail
            .as_ref()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME))
            })
            .unwrap_or(false);

        let debug_log_level = max_log_level
            .filter(|_| debug_utils_available && validation_layer_available);
        if max_log_level.is_some() && debug_log_level.is_none() {
            tracing::warn!(
                "Validation requested but unavailable (debug utils: {}, \
                 validation layer: {}); continuing without it",
                debug_utils_available,
                validation_layer_available
            );
        }

        let mut enabled_ext_ptrs: Vec<_> =
            mandatory_exts.iter().map(|ext| ext.as_ptr()).collect();
        let mut enabled_layers: Vec<*const std::ffi::c_char> = Vec::new();

        let mut debug_messenger_create_info = debug_log_level.map(|log_level| {
            enabled_ext_ptrs.push(debug_utils_ext_name.as_ptr());
            enabled_layers.push(VALIDATION_LAYER_NAME.as_ptr());

            vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(log_level.severity_flags())
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback))
        });

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstring)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"hvk")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(REQUIRED_API_VERSION);

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_ext_ptrs)
            .enabled_layer_names(&enabled_layers);

        if let Some(ref mut debug_info) = debug_messenger_create_info {
            instance_create_info = instance_create_info.push_next(debug_info);
        }

        //SAFETY: We made a valid instance_create_info
        let instance = unsafe { entry.create_instance(&instance_create_info, None) }?;

        let debug_messenger =
            if let Some(mut debug_messenger_create_info) = debug_messenger_create_info {
                debug_messenger_create_info.p_next = std::ptr::null();
                let debug_utils_instance =
                    ash::ext::debug_utils::Instance::new(&entry, &instance);
                //SAFETY: Valid CI with the chain pointer cleared
                match unsafe {
                    debug_utils_instance
                        .create_debug_utils_messenger(&debug_messenger_create_info, None)
                } {
                    Ok(debug_messenger) => Some((debug_messenger, debug_utils_instance)),
                    Err(e) => {
                        tracing::error!(
                            "Failed to create debug messenger, continuing \
                             without one: {e}"
                        );
                        None
                    }
                }
            } else {
                None
            };

        let surface_instance = enabled_exts
            .surface
            .then(|| ash::khr::surface::Instance::new(&entry, &instance));

        Ok(Instance {
            entry,
            handle: instance,
            debug_messenger,
            surface_instance,
            ver: loader_version,
        })
    }

    /// Get a vector of handles to available physical devices, in enumeration
    /// order. These handles are ONLY valid in the context of this instance.
    pub fn fetch_raw_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, FetchPhysicalDeviceError> {
        //SAFETY: Pretty much always fine
        match unsafe { self.handle.enumerate_physical_devices() } {
            Ok(v) => Ok(v),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            | Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                Err(FetchPhysicalDeviceError::MemoryExhaustion)
            }
            Err(e) => Err(FetchPhysicalDeviceError::UnknownVulkan(e)),
        }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        //SAFETY: physical_device was derived from this instance
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        //SAFETY: physical_device was derived from this instance
        unsafe {
            self.handle
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn enumerate_raw_device_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::ExtensionProperties>, vk::Result> {
        //SAFETY: physical_device was derived from this instance
        unsafe {
            self.handle
                .enumerate_device_extension_properties(physical_device)
        }
    }

    /// Create a logical device from a physical device.
    ///
    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    /// `create_info` must be a valid DeviceCreateInfo whose pointers stay
    /// valid for the duration of the call.
    pub unsafe fn create_ash_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        //SAFETY: physical_device was derived from this instance,
        //create_info is valid
        unsafe { self.handle.create_device(physical_device, create_info, None) }
    }
}

#[derive(Debug, Error)]
pub enum FetchPhysicalDeviceError {
    #[error("Error fetching physical devices, memory exhaustion")]
    MemoryExhaustion,
    #[error("Error fetching physical devices, Unknown vulkan: {0}")]
    UnknownVulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum DestroyRawSurfaceError {
    #[error("Surface extension is not loaded")]
    ExtensionNotLoaded,
}

// Surface functionality
impl Instance {
    ///Create a raw VkSurfaceKHR.
    ///
    /// # Safety
    /// The returned surface must be destroyed before source is dropped. There
    /// is a parent child relationship between both the instance and source
    /// and the returned surface.
    pub unsafe fn create_raw_surface<T: HasDisplayHandle + HasWindowHandle>(
        &self,
        source: &T,
    ) -> Result<vk::SurfaceKHR, CreateSurfaceError> {
        use CreateSurfaceError as Error;
        if self.surface_instance.is_none() {
            return Err(Error::MissingExtension);
        }
        let display = source
            .display_handle()
            .map_err(Error::InvalidDisplayHandle)?
            .as_raw();
        let window = source
            .window_handle()
            .map_err(Error::InvalidWindowHandle)?
            .as_raw();
        //SAFETY: the handles come from a live source which the caller keeps
        //alive for the lifetime of the surface
        unsafe { ash_window::create_surface(&self.entry, &self.handle, display, window, None) }
            .map_err(Error::VulkanError)
    }

    /// Destroy the raw VkSurfaceKHR.
    ///
    /// # Safety
    /// All objects derived from surf must be destroyed first and surf must be
    /// derived from this instance.
    pub unsafe fn destroy_raw_surface(
        &self,
        surf: vk::SurfaceKHR,
    ) -> Result<(), DestroyRawSurfaceError> {
        if let Some(ref surface_instance) = self.surface_instance {
            // SAFETY: Surf is derived from this instance (passed on to caller)
            unsafe { surface_instance.destroy_surface(surf, None) };
            Ok(())
        } else {
            Err(DestroyRawSurfaceError::ExtensionNotLoaded)
        }
    }

    /// Check if a queue family on a physical device supports presenting to
    /// a surface.
    ///
    /// # Safety
    /// `physical_device` and `surface` must be derived from this instance.
    pub unsafe fn get_raw_physical_device_surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, SurfaceSupportError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceSupportError::ExtensionNotLoaded)?;
        //SAFETY: physical_device and surface were derived from this instance
        unsafe {
            surface_instance.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                surface,
            )
        }
        .map_err(SurfaceSupportError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this
    /// instance.
    pub unsafe fn get_surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        // SAFETY: Caller guarantees physical_device and surface provenance.
        unsafe {
            surface_instance.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this
    /// instance.
    pub unsafe fn get_surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        // SAFETY: Caller guarantees physical_device and surface provenance.
        unsafe { surface_instance.get_physical_device_surface_formats(physical_device, surface) }
            .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this
    /// instance.
    pub unsafe fn get_surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::PresentModeKHR>, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        // SAFETY: Caller guarantees physical_device and surface provenance.
        unsafe {
            surface_instance.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }
}

// Device extension loader creation functionality
impl Instance {
    pub fn create_swapchain_loader(&self, device: &ash::Device) -> ash::khr::swapchain::Device {
        ash::khr::swapchain::Device::new(&self.handle, device)
    }

    pub fn create_debug_utils_device_loader(
        &self,
        device: &ash::Device,
    ) -> Option<ash::ext::debug_utils::Device> {
        self.debug_messenger
            .is_some()
            .then(|| ash::ext::debug_utils::Device::new(&self.handle, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_version_raw_roundtrip() {
        let raw = vk::make_api_version(0, 1, 3, 275);
        let version = VkVersion::from_raw(raw);

        assert_eq!(version.to_raw(), raw);
        assert_eq!(version.variant(), 0);
        assert_eq!(version.major(), 1);
        assert_eq!(version.minor(), 3);
        assert_eq!(version.patch(), 275);
    }

    #[test]
    fn at_least_ignores_patch() {
        let required = VkVersion::from_raw(REQUIRED_API_VERSION);
        assert!(VkVersion::new(0, 1, 3, 0).at_least(required));
        assert!(VkVersion::new(0, 1, 4, 0).at_least(required));
        assert!(VkVersion::new(0, 2, 0, 0).at_least(required));
        assert!(!VkVersion::new(0, 1, 2, 999).at_least(required));
    }

    #[test]
    fn version_displays_as_dotted_triple() {
        assert_eq!(VkVersion::new(0, 1, 3, 275).to_string(), "1.3.275");
    }

    #[test]
    fn message_type_labels() {
        assert_eq!(
            message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "VALIDATION"
        );
        assert_eq!(
            message_type_label(
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            ),
            "UNKNOWN"
        );
    }
}
