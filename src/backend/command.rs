// Command pool ownership
//
// A pool is bound to one queue family at construction. Transient pools hint
// that their command buffers are short-lived (the one-shot transfer pool).

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{RendererError, Result};

pub struct CommandPool {
    pool: vk::CommandPool,
    pub queue_family: u32,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>, queue_family: u32, transient: bool) -> Result<Self> {
        let flags = if transient {
            vk::CommandPoolCreateFlags::TRANSIENT
        } else {
            vk::CommandPoolCreateFlags::empty()
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(RendererError::CommandPoolCreation)?;

        log::debug!("Created command pool for queue family {}", queue_family);

        Ok(Self {
            pool,
            queue_family,
            device,
        })
    }

    /// Raw pool handle, for components that allocate their own buffers.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
