// Static quad geometry and its device-local buffers
//
// The mesh is uploaded once at startup through the staging pattern and never
// mutated afterwards.

use ash::vk;
use glam::{Vec2, Vec3};
use std::sync::Arc;

use super::buffer::{copy_buffer, GpuBuffer};
use super::command::CommandPool;
use super::VulkanDevice;
use crate::error::Result;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Vertex {
    pub pos: Vec2,
    pub color: Vec3,
}

pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex {
        pos: Vec2::new(-0.5, -0.5),
        color: Vec3::new(1.0, 1.0, 1.0),
    },
    Vertex {
        pos: Vec2::new(0.5, -0.5),
        color: Vec3::new(1.0, 0.0, 0.0),
    },
    Vertex {
        pos: Vec2::new(0.5, 0.5),
        color: Vec3::new(0.0, 1.0, 0.0),
    },
    Vertex {
        pos: Vec2::new(-0.5, 0.5),
        color: Vec3::new(0.0, 0.0, 1.0),
    },
];

pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::size_of::<Vec2>() as u32)
                .build(),
        ]
    }
}

/// Device-local vertex and index buffers for the quad.
pub struct MeshBuffers {
    pub vertex_buffer: GpuBuffer,
    pub index_buffer: GpuBuffer,
    pub index_count: u32,
}

impl MeshBuffers {
    pub fn upload(device: Arc<VulkanDevice>, transfer_pool: &CommandPool) -> Result<Self> {
        let vertex_buffer = upload_to_device(
            &device,
            transfer_pool,
            &QUAD_VERTICES,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let index_buffer = upload_to_device(
            &device,
            transfer_pool,
            &QUAD_INDICES,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        log::info!(
            "Uploaded mesh: {} vertices, {} indices",
            QUAD_VERTICES.len(),
            QUAD_INDICES.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: QUAD_INDICES.len() as u32,
        })
    }
}

/// Staging upload: host-visible staging buffer, mapped write, device-local
/// target, blocking copy on the transfer queue. The staging buffer is scoped
/// to this function and released on every exit path.
fn upload_to_device<T: Copy>(
    device: &Arc<VulkanDevice>,
    transfer_pool: &CommandPool,
    data: &[T],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;

    let staging = GpuBuffer::new(
        device.clone(),
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    staging.write(data)?;

    let target = GpuBuffer::new(
        device.clone(),
        size,
        vk::BufferUsageFlags::TRANSFER_DST | usage,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    copy_buffer(device, transfer_pool.handle(), staging.buffer, target.buffer, size)?;

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 20);
        assert_eq!(offset_of!(Vertex, pos), 0);
        assert_eq!(offset_of!(Vertex, color), 8);
    }

    #[test]
    fn binding_matches_vertex_stride() {
        let binding = Vertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn attributes_match_field_offsets() {
        let attributes = Vertex::attribute_descriptions();

        assert_eq!(attributes[0].location, 0);
        assert_eq!(attributes[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attributes[0].offset, 0);

        assert_eq!(attributes[1].location, 1);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attributes[1].offset, 8);
    }

    #[test]
    fn quad_is_two_triangles_over_four_vertices() {
        assert_eq!(QUAD_VERTICES.len(), 4);
        assert_eq!(QUAD_INDICES, [0, 1, 2, 2, 3, 0]);
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
    }

    #[test]
    fn upload_sizes_cover_the_full_arrays() {
        assert_eq!(std::mem::size_of_val(&QUAD_VERTICES), 4 * 20);
        assert_eq!(std::mem::size_of_val(&QUAD_INDICES), 6 * 4);
    }
}
