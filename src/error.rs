// Error taxonomy for the renderer
//
// Every bring-up step fails fast with one of these kinds and unwinds to main,
// which logs the message and exits nonzero. During the frame loop only the
// swapchain-rebuild triggers are handled in place.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = RendererError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("validation layers requested but not available")]
    ValidationUnavailable,

    #[error("failed to load the Vulkan library")]
    EntryLoad(#[source] ash::LoadingError),

    #[error("failed to create Vulkan instance")]
    InstanceCreation(#[source] vk::Result),

    #[error("failed to create window surface")]
    SurfaceCreation(#[source] vk::Result),

    #[error("no physical device meets the necessary criteria")]
    NoSuitableDevice,

    #[error("failed to create logical device")]
    DeviceCreation(#[source] vk::Result),

    #[error("failed to create swapchain")]
    SwapchainCreation(#[source] vk::Result),

    #[error("failed to create swapchain image view")]
    ImageViewCreation(#[source] vk::Result),

    #[error("failed to create framebuffer")]
    FramebufferCreation(#[source] vk::Result),

    #[error("failed to create render pass")]
    RenderPassCreation(#[source] vk::Result),

    #[error("failed to create graphics pipeline")]
    PipelineCreation(#[source] vk::Result),

    #[error("failed to read shader file {path:?}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create shader module")]
    ShaderModule(#[source] vk::Result),

    #[error("no suitable memory type for buffer allocation")]
    NoSuitableMemoryType,

    #[error("failed to create buffer")]
    BufferCreation(#[source] vk::Result),

    #[error("failed to create command pool")]
    CommandPoolCreation(#[source] vk::Result),

    #[error("failed to record command buffer")]
    CommandRecording(#[source] vk::Result),

    #[error("failed to create synchronization object")]
    SynchronizationObject(#[source] vk::Result),

    #[error("failed to submit frame")]
    FrameSubmission(#[source] vk::Result),

    #[error("Vulkan call failed")]
    Vulkan(#[from] vk::Result),
}
