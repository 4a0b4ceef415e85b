// Device buffer allocation and transfer primitives
//
// A GpuBuffer owns its handle and memory as one value: allocation happens in
// the constructor and both are released together on drop, handle first.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{RendererError, Result};

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        // The vertex/index buffers are written on the transfer queue and read
        // on the graphics queue; share them when the families differ.
        let queue_families = [device.graphics_queue_family, device.transfer_queue_family];
        let mut buffer_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        buffer_info = if device.graphics_queue_family != device.transfer_queue_family {
            buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        } else {
            buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(RendererError::BufferCreation)?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            memory_flags,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(RendererError::BufferCreation(e));
            }
        };

        if let Err(e) = unsafe { device.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.device.destroy_buffer(buffer, None);
                device.device.free_memory(memory, None);
            }
            return Err(RendererError::BufferCreation(e));
        }

        Ok(Self {
            buffer,
            memory,
            size,
            device,
        })
    }

    /// Write host data through a direct mapping. The memory must be
    /// host-visible and host-coherent, so no explicit flush is needed.
    pub fn write<T: Copy>(&self, data: &[T]) -> Result<()> {
        let byte_len = std::mem::size_of_val(data) as vk::DeviceSize;
        debug_assert!(byte_len <= self.size);

        unsafe {
            let ptr = self.device.device.map_memory(
                self.memory,
                0,
                byte_len,
                vk::MemoryMapFlags::empty(),
            )? as *mut T;

            ptr.copy_from_nonoverlapping(data.as_ptr(), data.len());
            self.device.device.unmap_memory(self.memory);
        }

        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// First memory type whose bit is set in the requirement mask and whose
/// property flags contain everything requested.
pub(crate) fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    for i in 0..memory_properties.memory_type_count {
        let matches_filter = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        if matches_filter && has_properties {
            return Ok(i);
        }
    }

    Err(RendererError::NoSuitableMemoryType)
}

/// Record and submit a one-shot copy on the transfer queue, blocking until
/// the queue is idle. The transient command buffer is freed on every exit
/// path. Synchronous by design: this runs once at startup, not per frame.
pub fn copy_buffer(
    device: &VulkanDevice,
    transfer_pool: vk::CommandPool,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(transfer_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }?[0];

    let result = (|| -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.device.begin_command_buffer(command_buffer, &begin_info)?;

            let region = vk::BufferCopy::builder().size(size).build();
            device
                .device
                .cmd_copy_buffer(command_buffer, src, dst, &[region]);

            device.device.end_command_buffer(command_buffer)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device
                .device
                .queue_submit(device.transfer_queue, &[submit_info.build()], vk::Fence::null())?;
            device.device.queue_wait_idle(device.transfer_queue)?;
        }

        Ok(())
    })();

    unsafe {
        device
            .device
            .free_command_buffers(transfer_pool, &[command_buffer]);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[(u32, vk::MemoryPropertyFlags)]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &(heap_index, flags)) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index,
            };
        }
        props
    }

    #[test]
    fn picks_first_matching_type() {
        let props = memory_properties(&[
            (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            (0, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT),
            (0, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT),
        ]);

        let index = find_memory_type(
            &props,
            0b111,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn respects_the_requirement_mask() {
        let props = memory_properties(&[
            (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
        ]);

        // Only bit 1 is allowed by the requirements.
        let index = find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn requires_all_requested_properties() {
        let props = memory_properties(&[(0, vk::MemoryPropertyFlags::HOST_VISIBLE)]);

        let result = find_memory_type(
            &props,
            0b1,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert!(matches!(result, Err(RendererError::NoSuitableMemoryType)));
    }

    #[test]
    fn fails_when_no_type_matches() {
        let props = memory_properties(&[(0, vk::MemoryPropertyFlags::DEVICE_LOCAL)]);

        let result = find_memory_type(&props, 0, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(matches!(result, Err(RendererError::NoSuitableMemoryType)));
    }
}
