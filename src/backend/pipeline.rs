// Render pass and graphics pipeline creation
//
// Both are rebuilt together with the swapchain: the render pass depends on
// the chosen image format, the pipeline viewport/scissor on the extent.

use ash::vk;

use super::mesh::Vertex;
use super::shader::load_shader_module;
use super::VulkanDevice;
use crate::error::{RendererError, Result};

pub const VERT_SHADER_PATH: &str = "shaders/quad.vert.spv";
pub const FRAG_SHADER_PATH: &str = "shaders/quad.frag.spv";

/// Single color-attachment render pass targeting the swapchain format.
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments)
        .build();

    // The acquire semaphore is waited on at color-attachment output; the
    // external dependency orders the layout transition behind it.
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .map_err(RendererError::RenderPassCreation)
}

/// Build the fixed-function graphics pipeline for the quad. Shader modules
/// are loaded from disk, consumed by the pipeline, and destroyed before
/// returning on both success and failure.
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    let vert_module = load_shader_module(device, VERT_SHADER_PATH)?;
    let frag_module = match load_shader_module(device, FRAG_SHADER_PATH) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vert_module, None) };
            return Err(e);
        }
    };

    let result = build_pipeline(device, render_pass, extent, vert_module, frag_module);

    unsafe {
        device.device.destroy_shader_module(vert_module, None);
        device.device.destroy_shader_module(frag_module, None);
    }

    result
}

fn build_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    let entry_point = c"main";

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_module)
        .name(entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_module)
        .name(entry_point)
        .build();

    let shader_stages = [vert_stage, frag_stage];

    let bindings = [Vertex::binding_description()];
    let attributes = Vertex::attribute_descriptions();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
        .build();

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent)
        .build();

    let viewports = [viewport];
    let scissors = [scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = [color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let layout_info = vk::PipelineLayoutCreateInfo::builder();

    let pipeline_layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .map_err(RendererError::PipelineCreation)?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device.device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            &[pipeline_info],
            None,
        )
    };

    match pipelines {
        Ok(pipelines) => {
            log::info!("Graphics pipeline created");
            Ok((pipelines[0], pipeline_layout))
        }
        Err((_, e)) => {
            unsafe { device.device.destroy_pipeline_layout(pipeline_layout, None) };
            Err(RendererError::PipelineCreation(e))
        }
    }
}
