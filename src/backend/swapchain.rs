// Swapchain - window presentation
//
// Owns the chain of presentable images, their views, and the framebuffers
// built on top of them. Recreated wholesale whenever the surface size changes.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{RendererError, Result};

/// Surface capabilities reported by the presentation layer for one device.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Pick the surface format: 8-bit BGRA with sRGB-nonlinear color space when
/// available. A single reported UNDEFINED format means the surface has no
/// preference and yields that same pair.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if available.len() == 1 && available[0].format == vk::Format::UNDEFINED {
        return vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
    }

    available
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(available[0])
}

/// Pick the present mode: MAILBOX when available, else FIFO (always supported).
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    available
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Pick the extent: the surface's fixed current extent when reported,
/// otherwise the window size clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Pick the image count: one more than the minimum, clamped to the maximum
/// when the surface declares one (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Create the swapchain and its image views. On any view failure the
    /// whole chain is torn down before the error is returned, so a partial
    /// view set is never left behind.
    pub fn new(device: Arc<VulkanDevice>, width: u32, height: u32) -> Result<Self> {
        let support = device.query_swapchain_support()?;

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            image_count,
            present_mode
        );

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RendererError::SwapchainCreation)?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(RendererError::SwapchainCreation(e));
            }
        };

        let image_views =
            match create_image_views(&device.device, &images, surface_format.format) {
                Ok(views) => views,
                Err(e) => {
                    unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                    return Err(e);
                }
            };

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            image_views,
            framebuffers: Vec::new(),
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// One framebuffer per image view, sized to the chosen extent. The render
    /// pass must be compatible with the stored image format.
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        debug_assert!(self.framebuffers.is_empty());

        let framebuffers: Result<Vec<_>> = self
            .image_views
            .iter()
            .map(|&view| {
                let attachments = [view];
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(self.extent.width)
                    .height(self.extent.height)
                    .layers(1);

                unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                    .map_err(RendererError::FramebufferCreation)
            })
            .collect();

        match framebuffers {
            Ok(framebuffers) => {
                self.framebuffers = framebuffers;
                Ok(())
            }
            Err(e) => {
                self.destroy_framebuffers();
                Err(e)
            }
        }
    }

    /// Tear down the framebuffers alone. Must run before the render pass they
    /// were built against is destroyed.
    pub fn destroy_framebuffers(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }

    /// Acquire the next presentable image, waiting indefinitely. Returns the
    /// image index and whether the swapchain is suboptimal for the surface.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
    ) -> std::result::Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Present an acquired image on the given queue, waiting on the supplied
    /// semaphores. Returns whether the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> std::result::Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// One 2D color view per swapchain image, identity channel mapping, single
/// mip level and array layer. All-or-nothing: already-created views are
/// destroyed on failure.
fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        match unsafe { device.create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(RendererError::ImageViewCreation(e));
            }
        }
    }

    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        min_count: u32,
        max_count: u32,
        current: vk::Extent2D,
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn surface_with_no_preference_defaults_to_bgra_srgb() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn preferred_format_wins_when_listed() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn first_format_is_fallback() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R5G6B5_UNORM_PACK16,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        assert_eq!(choose_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn mailbox_preferred_fifo_fallback() {
        let with_mailbox = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        let without_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        assert_eq!(choose_present_mode(&with_mailbox), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&without_mailbox), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn fixed_current_extent_wins_over_window_size() {
        let caps = capabilities(
            2,
            0,
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
        );

        let extent = choose_extent(&caps, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn undefined_extent_clamps_window_size() {
        let caps = capabilities(2, 0, UNDEFINED_EXTENT);

        let within = choose_extent(&caps, 800, 600);
        assert_eq!((within.width, within.height), (800, 600));

        let above = choose_extent(&caps, 10_000, 10_000);
        assert_eq!((above.width, above.height), (4096, 4096));

        let below = choose_extent(&caps, 0, 0);
        assert_eq!((below.width, below.height), (1, 1));
    }

    #[test]
    fn image_count_is_min_plus_one() {
        let caps = capabilities(2, 0, UNDEFINED_EXTENT);
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn image_count_clamps_to_declared_max() {
        let caps = capabilities(2, 2, UNDEFINED_EXTENT);
        assert_eq!(choose_image_count(&caps), 2);

        let equal_bounds = capabilities(3, 3, UNDEFINED_EXTENT);
        assert_eq!(choose_image_count(&equal_bounds), 3);
    }

    // Surface reports no preferred format, FIFO only, min 2 / unbounded max,
    // no fixed extent; window is 800x600.
    #[test]
    fn default_surface_with_800x600_window() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let present_modes = [vk::PresentModeKHR::FIFO];
        let caps = capabilities(2, 0, UNDEFINED_EXTENT);

        let format = choose_surface_format(&formats);
        assert_eq!(format.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(format.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);

        assert_eq!(choose_present_mode(&present_modes), vk::PresentModeKHR::FIFO);

        let extent = choose_extent(&caps, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));

        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn default_surface_with_max_two_images() {
        let caps = capabilities(2, 2, UNDEFINED_EXTENT);
        assert_eq!(choose_image_count(&caps), 2);
    }
}
