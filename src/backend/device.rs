// Vulkan device - core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation (via ash-window)
// - Physical device selection by suitability score
// - Logical device + graphics/transfer queue creation

use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::swapchain::SwapchainSupport;
use crate::error::{RendererError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Score bonus for discrete GPUs. Dominates realistic differences in
/// maximum image dimension between candidates of the same tier.
pub(crate) const DISCRETE_GPU_BONUS: u32 = 1000;

fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Queue family indices required by the renderer: one family that supports
/// graphics and presentation to the surface, one that supports transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.transfer.is_some()
    }
}

/// Capability summary for a single physical device, gathered once during
/// selection and fed to `rate_device`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeviceProfile {
    pub queues_complete: bool,
    pub extensions_supported: bool,
    pub has_surface_formats: bool,
    pub has_present_modes: bool,
    pub discrete_gpu: bool,
    pub max_image_dimension_2d: u32,
    pub geometry_shader: bool,
}

/// Rate a device's suitability. Any missing requirement disqualifies the
/// candidate with a score of 0.
pub(crate) fn rate_device(profile: &DeviceProfile) -> u32 {
    if !profile.queues_complete
        || !profile.extensions_supported
        || !profile.has_surface_formats
        || !profile.has_present_modes
    {
        return 0;
    }

    let mut score = 0;
    if profile.discrete_gpu {
        score += DISCRETE_GPU_BONUS;
    }
    score += profile.max_image_dimension_2d;

    if !profile.geometry_shader {
        return 0;
    }

    score
}

/// Vulkan device wrapper with automatic cleanup.
///
/// Owns the instance, debug messenger, surface, and logical device. Drop
/// order: device first, then debug messenger and surface, instance last.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    pub graphics_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub transfer_queue_family: u32,

    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }.map_err(RendererError::EntryLoad)?;

        if enable_validation && !check_validation_layer_support(&entry)? {
            return Err(RendererError::ValidationUnavailable);
        }

        let instance = create_instance(&entry, app_name, enable_validation, display_handle)?;

        let debug_utils = if enable_validation {
            Some(setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(RendererError::SurfaceCreation)?;
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);

        let (physical_device, graphics_queue_family, transfer_queue_family) =
            pick_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, transfer_queue) = create_logical_device(
            &instance,
            physical_device,
            enable_validation,
            graphics_queue_family,
            transfer_queue_family,
        )?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            graphics_queue,
            transfer_queue,
            graphics_queue_family,
            transfer_queue_family,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    /// Surface capabilities, formats, and present modes for the selected GPU.
    pub fn query_swapchain_support(&self) -> Result<SwapchainSupport> {
        SwapchainSupport::query(&self.surface_loader, self.surface, self.physical_device)
    }

    /// Wait for all submitted GPU work to complete.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

fn check_validation_layer_support(entry: &Entry) -> Result<bool> {
    let available = entry.enumerate_instance_layer_properties()?;

    let found = available.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER
    });

    Ok(found)
}

fn create_instance(
    entry: &Entry,
    app_name: &str,
    enable_validation: bool,
    display_handle: RawDisplayHandle,
) -> Result<ash::Instance> {
    let app_name_cstr = CString::new(app_name).unwrap_or_default();
    let engine_name = CString::new("quad-renderer").unwrap_or_default();

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    let mut extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(RendererError::InstanceCreation)?
        .to_vec();
    if enable_validation {
        extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
    }

    let layer_names = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    unsafe { entry.create_instance(&create_info, None) }.map_err(RendererError::InstanceCreation)
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(RendererError::InstanceCreation)?;

    Ok((debug_utils, messenger))
}

/// Find the queue families the renderer needs on one physical device.
///
/// The graphics family must also support presentation to the surface. The
/// transfer family prefers a dedicated (non-graphics) family and falls back
/// to any transfer-capable one.
fn find_queue_families(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let mut indices = QueueFamilyIndices::default();
    let mut shared_transfer = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            let present_support = unsafe {
                surface_loader.get_physical_device_surface_support(physical_device, i, surface)
            }?;
            if present_support {
                indices.graphics = Some(i);
            }
        }

        if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                if indices.transfer.is_none() {
                    indices.transfer = Some(i);
                }
            } else if shared_transfer.is_none() {
                shared_transfer = Some(i);
            }
        }
    }

    if indices.transfer.is_none() {
        indices.transfer = shared_transfer;
    }

    Ok(indices)
}

fn check_device_extension_support(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<bool> {
    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }?;

    let supported = required_device_extensions().iter().all(|&needed| {
        available.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == needed
        })
    });

    Ok(supported)
}

fn profile_device(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    indices: &QueueFamilyIndices,
) -> Result<DeviceProfile> {
    let extensions_supported = check_device_extension_support(instance, physical_device)?;
    let support = SwapchainSupport::query(surface_loader, surface, physical_device)?;
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let features = unsafe { instance.get_physical_device_features(physical_device) };

    Ok(DeviceProfile {
        queues_complete: indices.is_complete(),
        extensions_supported,
        has_surface_formats: !support.formats.is_empty(),
        has_present_modes: !support.present_modes.is_empty(),
        discrete_gpu: properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
        max_image_dimension_2d: properties.limits.max_image_dimension2_d,
        geometry_shader: features.geometry_shader == vk::TRUE,
    })
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        return Err(RendererError::NoSuitableDevice);
    }

    let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilyIndices)> = None;

    for physical_device in devices {
        let indices = find_queue_families(instance, surface_loader, surface, physical_device)?;
        let profile = profile_device(instance, surface_loader, surface, physical_device, &indices)?;
        let score = rate_device(&profile);

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::debug!(
            "Candidate GPU {} scored {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            score
        );

        if score > best.as_ref().map_or(0, |(s, _, _)| *s) {
            best = Some((score, physical_device, indices));
        }
    }

    let (_, physical_device, indices) = best.ok_or(RendererError::NoSuitableDevice)?;
    let graphics = indices.graphics.ok_or(RendererError::NoSuitableDevice)?;
    let transfer = indices.transfer.ok_or(RendererError::NoSuitableDevice)?;

    Ok((physical_device, graphics, transfer))
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    enable_validation: bool,
    graphics_queue_family: u32,
    transfer_queue_family: u32,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let mut unique_families = vec![graphics_queue_family];
    if transfer_queue_family != graphics_queue_family {
        unique_families.push(transfer_queue_family);
    }

    let queue_priorities = [1.0];
    let queue_create_infos: Vec<_> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions: Vec<_> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let layer_names = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .map_err(RendererError::DeviceCreation)?;

    let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
    let transfer_queue = unsafe { device.get_device_queue(transfer_queue_family, 0) };

    log::info!("Logical device created");

    Ok((device, graphics_queue, transfer_queue))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eligible_profile() -> DeviceProfile {
        DeviceProfile {
            queues_complete: true,
            extensions_supported: true,
            has_surface_formats: true,
            has_present_modes: true,
            discrete_gpu: false,
            max_image_dimension_2d: 4096,
            geometry_shader: true,
        }
    }

    #[test]
    fn integrated_device_scores_its_max_dimension() {
        assert_eq!(rate_device(&eligible_profile()), 4096);
    }

    #[test]
    fn discrete_device_adds_constant_bonus() {
        let profile = DeviceProfile {
            discrete_gpu: true,
            ..eligible_profile()
        };
        assert_eq!(rate_device(&profile), DISCRETE_GPU_BONUS + 4096);
    }

    #[test]
    fn larger_max_dimension_always_scores_higher() {
        let small = DeviceProfile {
            max_image_dimension_2d: 8192,
            ..eligible_profile()
        };
        let large = DeviceProfile {
            max_image_dimension_2d: 16384,
            ..eligible_profile()
        };
        assert!(rate_device(&large) > rate_device(&small));
    }

    #[test]
    fn missing_requirements_disqualify_absolutely() {
        let strong = DeviceProfile {
            discrete_gpu: true,
            max_image_dimension_2d: u32::MAX - DISCRETE_GPU_BONUS,
            ..eligible_profile()
        };

        let cases = [
            DeviceProfile {
                queues_complete: false,
                ..strong
            },
            DeviceProfile {
                extensions_supported: false,
                ..strong
            },
            DeviceProfile {
                has_surface_formats: false,
                ..strong
            },
            DeviceProfile {
                has_present_modes: false,
                ..strong
            },
            DeviceProfile {
                geometry_shader: false,
                ..strong
            },
        ];

        for profile in cases {
            assert_eq!(
                rate_device(&profile),
                0,
                "profile was not disqualified: {profile:?}"
            );
        }
    }

    #[test]
    fn integrated_4096_beats_discrete_2048() {
        let integrated = eligible_profile();
        let discrete = DeviceProfile {
            discrete_gpu: true,
            max_image_dimension_2d: 2048,
            ..eligible_profile()
        };

        assert_eq!(rate_device(&integrated), 4096);
        assert_eq!(rate_device(&discrete), 3048);
        assert!(rate_device(&integrated) > rate_device(&discrete));
    }

    #[test]
    fn scoring_is_deterministic() {
        let profile = DeviceProfile {
            discrete_gpu: true,
            ..eligible_profile()
        };
        let first = rate_device(&profile);
        for _ in 0..8 {
            assert_eq!(rate_device(&profile), first);
        }
    }

    #[test]
    fn incomplete_queue_indices() {
        let none = QueueFamilyIndices::default();
        let only_graphics = QueueFamilyIndices {
            graphics: Some(0),
            transfer: None,
        };
        let both = QueueFamilyIndices {
            graphics: Some(0),
            transfer: Some(1),
        };

        assert!(!none.is_complete());
        assert!(!only_graphics.is_complete());
        assert!(both.is_complete());
    }
}
