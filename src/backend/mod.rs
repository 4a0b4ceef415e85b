// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash; ownership carries cleanup.

pub mod buffer;
pub mod command;
pub mod device;
pub mod mesh;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use command::CommandPool;
pub use device::VulkanDevice;
pub use mesh::MeshBuffers;
pub use swapchain::Swapchain;
