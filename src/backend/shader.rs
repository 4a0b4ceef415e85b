// Shader module loading
//
// Shaders are precompiled to SPIR-V by the build step and read from fixed
// relative paths at startup.

use ash::vk;
use std::path::Path;

use super::VulkanDevice;
use crate::error::{RendererError, Result};

/// Read a SPIR-V binary from disk and create a shader module from it.
pub fn load_shader_module(device: &VulkanDevice, path: impl AsRef<Path>) -> Result<vk::ShaderModule> {
    let path = path.as_ref();

    let bytes = std::fs::read(path).map_err(|source| RendererError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;

    // SPIR-V is a stream of 4-byte words; read_spv re-aligns if needed.
    let code = ash::util::read_spv(&mut std::io::Cursor::new(&bytes)).map_err(|source| {
        RendererError::ShaderRead {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .map_err(RendererError::ShaderModule)
}
