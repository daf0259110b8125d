use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use thiserror::Error;

use crate::device::{Device, QueueFamilies};
use crate::render_pass::{CreateRenderPassError, RenderPass};
use crate::surface::{Surface, SurfaceQueryError, SurfaceSupport};

/// The only colour format the clear path is written for.
pub const REQUIRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
/// FIFO is the one present mode every conformant driver must expose.
pub const REQUIRED_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;

#[derive(Debug, Error)]
pub enum CreateSwapchainError {
    #[error(
        "Mismatched parameters to Swapchain::new. Device and surface must be \
         derived from the same instance"
    )]
    MismatchedParams,

    #[error("Invalid requested swapchain extent ({width}x{height})")]
    InvalidExtent { width: u32, height: u32 },

    #[error("Swapchain support was not enabled on this device")]
    SwapchainNotEnabled,

    #[error("Failed while querying surface support details: {0}")]
    SurfaceQuery(#[from] SurfaceQueryError),

    #[error("Surface does not support B8G8R8A8_UNORM (available: {available:?})")]
    UnsupportedFormat { available: Vec<vk::Format> },

    #[error("Surface does not support FIFO presentation (available: {available:?})")]
    UnsupportedPresentMode { available: Vec<vk::PresentModeKHR> },

    #[error("Vulkan error creating swapchain: {0}")]
    VulkanCreate(vk::Result),

    #[error("Vulkan error fetching swapchain images: {0}")]
    VulkanGetImages(vk::Result),

    #[error("Vulkan error creating swapchain image view: {0}")]
    VulkanCreateImageView(vk::Result),

    #[error("Vulkan error creating swapchain framebuffer: {0}")]
    VulkanCreateFramebuffer(vk::Result),

    #[error("Failed to create swapchain render pass: {0}")]
    RenderPass(#[from] CreateRenderPassError),
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats.iter().copied().find(|f| f.format == REQUIRED_FORMAT)
}

fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> Option<vk::PresentModeKHR> {
    present_modes
        .iter()
        .copied()
        .find(|m| *m == REQUIRED_PRESENT_MODE)
}

/// Framebuffer size clamped into the surface's supported range. The surface's
/// `current_extent` is not consulted.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: vk::Extent2D,
) -> vk::Extent2D {
    vk::Extent2D {
        width: framebuffer_size.width.clamp(
            capabilities.min_image_extent.width,
            capabilities
                .max_image_extent
                .width
                .max(capabilities.min_image_extent.width),
        ),
        height: framebuffer_size.height.clamp(
            capabilities.min_image_extent.height,
            capabilities
                .max_image_extent
                .height
                .max(capabilities.min_image_extent.height),
        ),
    }
}

fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 {
        image_count = image_count.min(capabilities.max_image_count);
    }
    image_count
}

/// CONCURRENT across both families when they differ, EXCLUSIVE otherwise.
fn choose_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

/// Everything derived from a surface support snapshot before any Vulkan
/// object is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainParams {
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainParams {
    pub fn choose(
        support: &SurfaceSupport,
        framebuffer_size: vk::Extent2D,
    ) -> Result<Self, CreateSwapchainError> {
        let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
            CreateSwapchainError::UnsupportedFormat {
                available: support.formats.iter().map(|f| f.format).collect(),
            }
        })?;
        let present_mode = choose_present_mode(&support.present_modes).ok_or_else(|| {
            CreateSwapchainError::UnsupportedPresentMode {
                available: support.present_modes.clone(),
            }
        })?;

        Ok(Self {
            extent: choose_extent(&support.capabilities, framebuffer_size),
            image_count: choose_image_count(&support.capabilities),
            surface_format,
            present_mode,
            pre_transform: support.capabilities.current_transform,
        })
    }
}

fn swapchain_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
}

/// Create one object per input. If any creation fails, the objects already
/// made are handed to `destroy` before the error is returned.
fn create_per_image<I, O, E, FCreate, FDestroy>(
    inputs: &[I],
    mut create: FCreate,
    mut destroy: FDestroy,
) -> Result<Vec<O>, E>
where
    I: Copy,
    FCreate: FnMut(usize, I) -> Result<O, E>,
    FDestroy: FnMut(O),
{
    let mut created = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().copied().enumerate() {
        match create(index, input) {
            Ok(output) => created.push(output),
            Err(e) => {
                for output in created.drain(..) {
                    destroy(output);
                }
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// A swapchain together with the per-image views, the render pass and the
/// per-image framebuffers built on it. The whole bundle is created and torn
/// down as one unit.
pub struct Swapchain<T: HasDisplayHandle + HasWindowHandle> {
    parent_device: Arc<Device>,
    _parent_surface: Arc<Surface<T>>,
    handle: vk::SwapchainKHR,
    params: SwapchainParams,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    render_pass: Option<RenderPass>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Swapchain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("handle", &self.handle)
            .field("format", &self.params.surface_format.format)
            .field("present_mode", &self.params.present_mode)
            .field("extent", &self.params.extent)
            .field("image_count", &self.images.len())
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Swapchain<T> {
    /// Build a swapchain sized to `framebuffer_size`, plus its views, render
    /// pass and framebuffers.
    ///
    /// Fails if the surface lacks [`REQUIRED_FORMAT`] or
    /// [`REQUIRED_PRESENT_MODE`]. Anything created before a failure is
    /// destroyed before returning.
    pub fn new(
        parent_device: &Arc<Device>,
        parent_surface: &Arc<Surface<T>>,
        framebuffer_size: vk::Extent2D,
    ) -> Result<Self, CreateSwapchainError> {
        if !parent_device.has_swapchain_support() {
            return Err(CreateSwapchainError::SwapchainNotEnabled);
        }

        if framebuffer_size.width == 0 || framebuffer_size.height == 0 {
            return Err(CreateSwapchainError::InvalidExtent {
                width: framebuffer_size.width,
                height: framebuffer_size.height,
            });
        }

        if !Arc::ptr_eq(parent_surface.get_parent(), parent_device.get_parent()) {
            return Err(CreateSwapchainError::MismatchedParams);
        }

        // SAFETY: the physical device belongs to parent_device's instance, and
        // parent_surface is derived from the same instance (checked above).
        let support = unsafe { parent_surface.query_support(parent_device.get_physical_device()) }?;
        let params = SwapchainParams::choose(&support, framebuffer_size)?;
        let (sharing_mode, queue_family_indices) = choose_sharing(parent_device.queue_families());

        tracing::info!(
            "Creating swapchain: {}x{}, {} images, {:?}/{:?}, {:?}, {:?}",
            params.extent.width,
            params.extent.height,
            params.image_count,
            params.surface_format.format,
            params.surface_format.color_space,
            params.present_mode,
            sharing_mode
        );

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(parent_surface.raw_handle())
            .min_image_count(params.image_count)
            .image_format(params.surface_format.format)
            .image_color_space(params.surface_format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(params.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .clipped(true);

        // SAFETY: create info references valid handles and values selected from
        // queried surface support details.
        let handle = unsafe { parent_device.create_raw_swapchain(&swapchain_create_info) }?;

        // From here on, dropping `swapchain` tears down whatever has been
        // built so far.
        let mut swapchain = Self {
            parent_device: Arc::clone(parent_device),
            _parent_surface: Arc::clone(parent_surface),
            handle,
            params,
            images: Vec::new(),
            image_views: Vec::new(),
            render_pass: None,
            framebuffers: Vec::new(),
        };

        let debug_index = parent_device.next_swapchain_debug_index();
        // SAFETY: handle is a valid swapchain created from parent_device.
        unsafe { parent_device.name_object(handle, || format!("Swapchain {debug_index}")) };

        // SAFETY: handle was created by this device's swapchain loader.
        swapchain.images = unsafe { parent_device.get_raw_swapchain_images(handle) }?;
        for (index, image) in swapchain.images.iter().copied().enumerate() {
            // SAFETY: image is owned by the swapchain created above.
            unsafe {
                parent_device.name_object(image, || {
                    format!("Swapchain {debug_index} Image {}", index + 1)
                })
            };
        }

        swapchain.image_views = create_per_image(
            &swapchain.images,
            |index, image| {
                let info = swapchain_view_info(image, params.surface_format.format);
                // SAFETY: info names a swapchain image from this device.
                let view = unsafe { parent_device.create_raw_image_view(&info) }
                    .map_err(CreateSwapchainError::VulkanCreateImageView)?;
                // SAFETY: view was just created from parent_device.
                unsafe {
                    parent_device.name_object(view, || {
                        format!("Swapchain {debug_index} ImageView {}", index + 1)
                    })
                };
                Ok::<_, CreateSwapchainError>(view)
            },
            // SAFETY: view was created above and nothing references it yet.
            |view| unsafe { parent_device.destroy_raw_image_view(view) },
        )?;

        let render_pass = RenderPass::new_clear_color(
            parent_device,
            params.surface_format.format,
            Some(&format!("Swapchain {debug_index} RenderPass")),
        )?;
        let raw_render_pass = render_pass.raw_handle();
        swapchain.render_pass = Some(render_pass);

        swapchain.framebuffers = create_per_image(
            &swapchain.image_views,
            |_, view| {
                let attachments = [view];
                let info = vk::FramebufferCreateInfo::default()
                    .render_pass(raw_render_pass)
                    .attachments(&attachments)
                    .width(params.extent.width)
                    .height(params.extent.height)
                    .layers(1);
                // SAFETY: render pass and view are live objects of this device.
                unsafe { parent_device.create_raw_framebuffer(&info) }
                    .map_err(CreateSwapchainError::VulkanCreateFramebuffer)
            },
            // SAFETY: framebuffer was created above and was never submitted.
            |framebuffer| unsafe { parent_device.destroy_raw_framebuffer(framebuffer) },
        )?;

        Ok(swapchain)
    }

    pub fn raw_handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn params(&self) -> &SwapchainParams {
        &self.params
    }

    pub fn format(&self) -> vk::Format {
        self.params.surface_format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.params.extent
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn render_pass(&self) -> Option<&RenderPass> {
        self.render_pass.as_ref()
    }

    /// Acquire the next presentable image, waiting without bound.
    ///
    /// Returns `(image_index, suboptimal)`, or
    /// `Err(vk::Result::ERROR_OUT_OF_DATE_KHR)` when the swapchain no longer
    /// matches its surface. `&mut self` provides the external
    /// synchronization Vulkan requires on the swapchain handle.
    ///
    /// # Safety
    /// `semaphore` must be a valid semaphore from this swapchain's device
    /// with no pending signal operation.
    pub unsafe fn acquire_next_image(
        &mut self,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        // SAFETY: Caller guarantees semaphore state. self.handle is valid for
        // the lifetime of this Swapchain.
        unsafe {
            self.parent_device.acquire_next_swapchain_image(
                self.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Present `image_index` once `wait_semaphore` is signaled. Returns
    /// `Ok(true)` when the swapchain is suboptimal.
    ///
    /// # Safety
    /// `image_index` must be an image acquired from this swapchain and not
    /// yet presented. `wait_semaphore` must have a pending signal operation.
    pub unsafe fn present(
        &mut self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        // SAFETY: Caller guarantees image and semaphore state.
        unsafe { self.parent_device.queue_present(&present_info) }
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Drop for Swapchain<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping swapchain {:?}", self.handle);
        // Callers wait for the device to go idle before dropping, so no
        // in-flight work references anything below.
        for framebuffer in self.framebuffers.drain(..) {
            // SAFETY: framebuffer was created by parent_device for this
            // swapchain and is destroyed before its render pass.
            unsafe { self.parent_device.destroy_raw_framebuffer(framebuffer) };
        }
        drop(self.render_pass.take());
        for image_view in self.image_views.drain(..) {
            // SAFETY: image_view was created by parent_device and is being
            // destroyed during swapchain teardown.
            unsafe { self.parent_device.destroy_raw_image_view(image_view) };
        }
        self.images.clear();
        // SAFETY: swapchain handle was created by parent_device and this is
        // the final destruction path for this wrapper.
        unsafe { self.parent_device.destroy_raw_swapchain(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(min: (u32, u32), max: (u32, u32), images: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: images.0,
            max_image_count: images.1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn support() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: capabilities((1, 1), (4096, 4096), (2, 8)),
            formats: vec![
                format(vk::Format::R8G8B8A8_SRGB),
                format(vk::Format::B8G8R8A8_UNORM),
            ],
            present_modes: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn choose_surface_format_requires_bgra_unorm() {
        let chosen = choose_surface_format(&[
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ]);
        assert_eq!(chosen.map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));
        assert!(choose_surface_format(&[format(vk::Format::B8G8R8A8_SRGB)]).is_none());
    }

    #[test]
    fn choose_present_mode_requires_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]),
            Some(vk::PresentModeKHR::FIFO)
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), None);
    }

    #[test]
    fn choose_extent_ignores_current_extent() {
        let mut caps = capabilities((640, 480), (1920, 1080), (2, 3));
        caps.current_extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let chosen = choose_extent(
            &caps,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((chosen.width, chosen.height), (800, 600));
    }

    #[test]
    fn choose_extent_clamps_each_axis() {
        let caps = capabilities((640, 480), (1920, 1080), (2, 3));
        let chosen = choose_extent(
            &caps,
            vk::Extent2D {
                width: 4000,
                height: 200,
            },
        );
        assert_eq!((chosen.width, chosen.height), (1920, 480));
    }

    #[test]
    fn extent_always_within_surface_bounds() {
        let caps = capabilities((100, 50), (1000, 700), (2, 3));
        for width in [1, 99, 100, 101, 500, 999, 1000, 1001, 10_000] {
            for height in [1, 49, 50, 51, 300, 699, 700, 701, 10_000] {
                let e = choose_extent(&caps, vk::Extent2D { width, height });
                assert!((100..=1000).contains(&e.width), "{width}x{height} -> {e:?}");
                assert!((50..=700).contains(&e.height), "{width}x{height} -> {e:?}");
            }
        }
    }

    #[test]
    fn choose_image_count_is_min_plus_one_capped() {
        assert_eq!(choose_image_count(&capabilities((1, 1), (1, 1), (2, 8))), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), (1, 1), (3, 3))), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), (1, 1), (2, 0))), 3);
    }

    #[test]
    fn image_count_stays_within_bounds() {
        for min in 1..6 {
            for max in [0, min, min + 1, min + 4] {
                let count = choose_image_count(&capabilities((1, 1), (1, 1), (min, max)));
                assert!(count >= min);
                if max > 0 {
                    assert!(count <= max);
                }
            }
        }
    }

    #[test]
    fn sharing_is_concurrent_only_for_split_families() {
        let (mode, indices) = choose_sharing(QueueFamilies {
            graphics: 0,
            present: 2,
        });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);

        let (mode, indices) = choose_sharing(QueueFamilies {
            graphics: 1,
            present: 1,
        });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());
    }

    #[test]
    fn params_are_stable_across_recreation() {
        let size = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let first = SwapchainParams::choose(&support(), size).unwrap();
        for _ in 0..4 {
            assert_eq!(SwapchainParams::choose(&support(), size).unwrap(), first);
        }
        assert_eq!(first.surface_format.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(first.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(first.image_count, 3);
        assert_eq!(first.pre_transform, vk::SurfaceTransformFlagsKHR::IDENTITY);
    }

    #[test]
    fn params_reject_missing_format_and_mode() {
        let size = vk::Extent2D {
            width: 1,
            height: 1,
        };
        let mut no_format = support();
        no_format.formats = vec![format(vk::Format::R8G8B8A8_SRGB)];
        assert!(matches!(
            SwapchainParams::choose(&no_format, size),
            Err(CreateSwapchainError::UnsupportedFormat { available })
                if available == vec![vk::Format::R8G8B8A8_SRGB]
        ));

        let mut no_fifo = support();
        no_fifo.present_modes = vec![vk::PresentModeKHR::MAILBOX];
        assert!(matches!(
            SwapchainParams::choose(&no_fifo, size),
            Err(CreateSwapchainError::UnsupportedPresentMode { .. })
        ));
    }

    #[test]
    fn view_info_covers_single_color_subresource() {
        let info = swapchain_view_info(vk::Image::from_raw(7), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(info.image, vk::Image::from_raw(7));
        assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(info.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(info.subresource_range.level_count, 1);
        assert_eq!(info.subresource_range.layer_count, 1);
    }

    #[test]
    fn per_image_helper_cleans_up_on_partial_failure() {
        let images = [
            vk::Image::from_raw(1),
            vk::Image::from_raw(2),
            vk::Image::from_raw(3),
        ];
        let created_views = [vk::ImageView::from_raw(10), vk::ImageView::from_raw(11)];
        let destroyed = RefCell::new(Vec::<vk::ImageView>::new());

        let result: Result<Vec<vk::ImageView>, vk::Result> = create_per_image(
            &images,
            |index, _| match index {
                0 | 1 => Ok(created_views[index]),
                _ => Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            },
            |view| destroyed.borrow_mut().push(view),
        );

        assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(destroyed.borrow().as_slice(), &created_views);
    }

    #[test]
    fn per_image_helper_surfaces_view_creation_error() {
        let images = [vk::Image::from_raw(1), vk::Image::from_raw(2)];
        let fake_create = |image: vk::Image| {
            if image == images[1] {
                Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
            } else {
                Ok(vk::ImageView::from_raw(image.as_raw() + 10))
            }
        };
        let destroyed = RefCell::new(Vec::<vk::ImageView>::new());

        let result = create_per_image(
            &images,
            |_, image| {
                let view =
                    fake_create(image).map_err(CreateSwapchainError::VulkanCreateImageView)?;
                Ok::<_, CreateSwapchainError>(view)
            },
            |view| destroyed.borrow_mut().push(view),
        );

        assert!(matches!(
            result,
            Err(CreateSwapchainError::VulkanCreateImageView(
                vk::Result::ERROR_OUT_OF_HOST_MEMORY
            ))
        ));
        assert_eq!(destroyed.borrow().as_slice(), &[vk::ImageView::from_raw(11)]);
    }

    #[test]
    fn per_image_helper_returns_outputs_in_order() {
        let views = [vk::ImageView::from_raw(100), vk::ImageView::from_raw(101)];
        let result: Result<Vec<vk::Framebuffer>, vk::Result> = create_per_image(
            &views,
            |index, view| {
                assert_eq!(view, views[index]);
                Ok(vk::Framebuffer::from_raw(200 + index as u64))
            },
            |_| panic!("destroy callback should not be called on success"),
        );

        assert_eq!(
            result.expect("helper should succeed"),
            vec![vk::Framebuffer::from_raw(200), vk::Framebuffer::from_raw(201)]
        );
    }
}
