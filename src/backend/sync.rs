// Synchronization primitives
//
// One semaphore pair shared across all frames: acquire signals
// image_available, the submit signals render_finished, present waits on it.
// Single frame in flight, so no fences are needed.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{RendererError, Result};

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();

        unsafe {
            let image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(RendererError::SynchronizationObject)?;

            let render_finished = match device.device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(RendererError::SynchronizationObject(e));
                }
            };

            Ok(Self {
                image_available,
                render_finished,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
        }
    }
}
