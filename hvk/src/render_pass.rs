use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateRenderPassError {
    #[error("Vulkan error creating render pass: {0}")]
    Vulkan(vk::Result),
}

/// Attachment description for the single colour target: cleared on load,
/// stored, and handed to the presentation engine afterwards.
pub fn clear_color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Orders the subpass's colour writes after any earlier external work at the
/// colour attachment output stage.
pub fn external_color_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
}

/// Single-subpass render pass with one colour attachment.
pub struct RenderPass {
    parent: Arc<Device>,
    handle: vk::RenderPass,
    format: vk::Format,
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl RenderPass {
    pub fn new_clear_color(
        device: &Arc<Device>,
        format: vk::Format,
        name: Option<&str>,
    ) -> Result<Self, CreateRenderPassError> {
        let attachments = [clear_color_attachment(format)];
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let dependencies = [external_color_dependency()];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        // SAFETY: create_info and the arrays it points to live on this stack
        // frame for the whole call.
        let handle = unsafe { device.create_raw_render_pass(&create_info) }
            .map_err(CreateRenderPassError::Vulkan)?;

        if let Some(name) = name {
            // SAFETY: handle is a valid render pass created from device.
            unsafe { device.name_object(handle, || name.to_owned()) };
        }

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            format,
        })
    }

    pub fn raw_handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        tracing::debug!("Dropping render pass {:?}", self.handle);
        // SAFETY: Framebuffers built against this pass are owned by the
        // swapchain, which drops them before its render pass.
        unsafe { self.parent.destroy_raw_render_pass(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_clears_then_presents() {
        let attachment = clear_color_attachment(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn dependency_comes_from_external_color_output() {
        let dep = external_color_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert_eq!(
            dep.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            dep.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(dep.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }
}
