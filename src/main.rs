// Quad renderer - renders a single static mesh with Vulkan
//
// Bring-up: window -> instance -> surface -> device selection -> logical
// device -> swapchain -> render pass -> pipeline -> framebuffers -> command
// pools -> vertex/index upload -> command recording -> semaphores.
// Every step is fatal on failure; there is no partial-ready state.
//
// Frame loop: acquire image -> submit the pre-recorded command buffer for
// that image -> present, with the semaphore pair ordering the three steps.
// Swapchain-dependent objects are rebuilt when the surface size changes.

mod backend;
mod config;
mod error;

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

use backend::sync::FrameSync;
use backend::{pipeline, CommandPool, MeshBuffers, Swapchain, VulkanDevice};
use config::Config;
use error::{RendererError, Result};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = Config::load();
    log::info!(
        "Starting renderer: {}x{}",
        config.window.width,
        config.window.height
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if let Some(e) = app.fatal_error.take() {
        return Err(e.into());
    }

    Ok(())
}

/// Minimized windows (zero-sized) suppress swapchain rebuilds until a
/// nonzero size is reported again.
fn apply_resize(width: u32, height: u32, needs_resize: &mut bool, is_minimized: &mut bool) {
    if width == 0 || height == 0 {
        *is_minimized = true;
    } else {
        *is_minimized = false;
        *needs_resize = true;
    }
}

// =============================================================================
// RENDER SESSION
// =============================================================================

/// All GPU state for the session. Constructed fully or not at all; torn down
/// in reverse dependency order.
struct Renderer {
    device: Arc<VulkanDevice>,

    /// Some outside of a rebuild; None only mid-rebuild or after a failed one.
    swapchain: Option<Swapchain>,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,

    graphics_pool: CommandPool,
    transfer_pool: CommandPool,
    mesh: MeshBuffers,
    /// One pre-recorded command buffer per swapchain image.
    command_buffers: Vec<vk::CommandBuffer>,

    sync: FrameSync,
    wait_stages: [vk::PipelineStageFlags; 1],

    clear_color: [f32; 4],
    needs_resize: bool,
    is_minimized: bool,
}

impl Renderer {
    fn new(window: &Window, config: &Config) -> Result<Self> {
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;

        let device = VulkanDevice::new(
            &config.window.title,
            enable_validation,
            window.raw_display_handle(),
            window.raw_window_handle(),
        )?;

        let graphics_pool =
            CommandPool::new(device.clone(), device.graphics_queue_family, false)?;
        let transfer_pool = CommandPool::new(device.clone(), device.transfer_queue_family, true)?;

        let mesh = MeshBuffers::upload(device.clone(), &transfer_pool)?;

        let sync = FrameSync::new(&device)?;

        let mut renderer = Self {
            device,
            swapchain: None,
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            graphics_pool,
            transfer_pool,
            mesh,
            command_buffers: Vec::new(),
            sync,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            clear_color: config.graphics.clear_color,
            needs_resize: false,
            is_minimized: false,
        };

        let size = window.inner_size();
        renderer.rebuild_swapchain(size.width, size.height)?;

        log::info!("Renderer initialized");
        Ok(renderer)
    }

    fn handle_resize(&mut self, width: u32, height: u32) {
        apply_resize(
            width,
            height,
            &mut self.needs_resize,
            &mut self.is_minimized,
        );
    }

    /// Tear down every swapchain-dependent object and recreate it against the
    /// current surface size. The device must go idle first: destroying
    /// resources the GPU still references is use-after-free.
    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        self.device.wait_idle()?;

        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.destroy_framebuffers();
        }
        if !self.command_buffers.is_empty() {
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.graphics_pool.handle(), &self.command_buffers);
            }
            self.command_buffers.clear();
        }
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
        self.pipeline = vk::Pipeline::null();
        self.pipeline_layout = vk::PipelineLayout::null();
        self.render_pass = vk::RenderPass::null();
        // The old chain must be gone before a new one targets the surface.
        self.swapchain = None;

        let mut swapchain = Swapchain::new(self.device.clone(), width, height)?;

        self.render_pass = pipeline::create_render_pass(&self.device, swapchain.format)?;

        let (graphics_pipeline, pipeline_layout) =
            pipeline::create_graphics_pipeline(&self.device, self.render_pass, swapchain.extent)?;
        self.pipeline = graphics_pipeline;
        self.pipeline_layout = pipeline_layout;

        swapchain.create_framebuffers(self.render_pass)?;

        self.command_buffers = record_draw_commands(
            &self.device,
            &swapchain,
            self.render_pass,
            self.pipeline,
            &self.mesh,
            self.graphics_pool.handle(),
            self.clear_color,
        )?;

        self.swapchain = Some(swapchain);
        self.needs_resize = false;

        Ok(())
    }

    /// Draw one frame: acquire -> submit -> present. Returns false when the
    /// frame was skipped (minimized or the swapchain went stale).
    fn draw_frame(&mut self, window: &Window) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        if self.needs_resize {
            let size = window.inner_size();
            self.rebuild_swapchain(size.width, size.height)?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(false);
        };

        let image_index = match swapchain.acquire_next_image(self.sync.image_available) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.needs_resize = true;
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_resize = true;
                return Ok(false);
            }
            Err(e) => return Err(RendererError::FrameSubmission(e)),
        };

        let command_buffers = [self.command_buffers[image_index as usize]];
        let wait_semaphores = [self.sync.image_available];
        let signal_semaphores = [self.sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    vk::Fence::null(),
                )
                .map_err(RendererError::FrameSubmission)?;
        }

        match swapchain.present(
            self.device.graphics_queue,
            image_index,
            &signal_semaphores,
        ) {
            Ok(suboptimal) => {
                if suboptimal {
                    self.needs_resize = true;
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.needs_resize = true;
            }
            Err(e) => return Err(RendererError::FrameSubmission(e)),
        }

        Ok(true)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Shutting down renderer...");

        let _ = self.device.wait_idle();

        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.destroy_framebuffers();
        }
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
        self.sync.destroy(&self.device.device);

        // Command buffers are freed with their pool; the swapchain, mesh
        // buffers, pools, and device clean up as their owners drop.
    }
}

/// Allocate and record one primary command buffer per framebuffer: begin
/// render pass (clear) -> bind pipeline -> bind vertex/index buffers ->
/// indexed draw -> end. SIMULTANEOUS_USE because the same buffer is
/// resubmitted across frames without re-recording. A failure on any buffer
/// fails the whole batch.
fn record_draw_commands(
    device: &VulkanDevice,
    swapchain: &Swapchain,
    render_pass: vk::RenderPass,
    graphics_pipeline: vk::Pipeline,
    mesh: &MeshBuffers,
    pool: vk::CommandPool,
    clear_color: [f32; 4],
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(swapchain.framebuffers.len() as u32);

    let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .map_err(RendererError::CommandRecording)?;

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: clear_color,
        },
    }];

    let result = (|| -> Result<()> {
        for (i, &cmd) in command_buffers.iter().enumerate() {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

            unsafe {
                device
                    .device
                    .begin_command_buffer(cmd, &begin_info)
                    .map_err(RendererError::CommandRecording)?;

                let render_pass_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(swapchain.framebuffers[i])
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: swapchain.extent,
                    })
                    .clear_values(&clear_values);

                device.device.cmd_begin_render_pass(
                    cmd,
                    &render_pass_info,
                    vk::SubpassContents::INLINE,
                );
                device.device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    graphics_pipeline,
                );
                device
                    .device
                    .cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer.buffer], &[0]);
                device.device.cmd_bind_index_buffer(
                    cmd,
                    mesh.index_buffer.buffer,
                    0,
                    vk::IndexType::UINT32,
                );
                device.device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
                device.device.cmd_end_render_pass(cmd);

                device
                    .device
                    .end_command_buffer(cmd)
                    .map_err(RendererError::CommandRecording)?;
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        unsafe { device.device.free_command_buffers(pool, &command_buffers) };
        return Err(e);
    }

    log::info!("Recorded {} command buffers", command_buffers.len());
    Ok(command_buffers)
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    fatal_error: Option<RendererError>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            fatal_error: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                self.fatal_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref renderer) = self.renderer {
                    let _ = renderer.device.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut renderer) = self.renderer {
                    renderer.handle_resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let window = match self.window.clone() {
                    Some(window) => window,
                    None => return,
                };
                if let Some(ref mut renderer) = self.renderer {
                    if let Err(e) = renderer.draw_frame(&window) {
                        self.fatal_error = Some(e);
                        event_loop.exit();
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::apply_resize;

    // Models one frame-loop iteration: a rebuild happens only when the window
    // is not minimized and a resize is pending.
    fn consume_rebuild(needs_resize: &mut bool, is_minimized: bool) -> bool {
        if !is_minimized && *needs_resize {
            *needs_resize = false;
            return true;
        }
        false
    }

    #[test]
    fn nonzero_resize_requests_rebuild() {
        let (mut needs_resize, mut is_minimized) = (false, false);
        apply_resize(1024, 768, &mut needs_resize, &mut is_minimized);
        assert!(needs_resize);
        assert!(!is_minimized);
    }

    #[test]
    fn zero_size_suppresses_rebuild_until_restored() {
        let (mut needs_resize, mut is_minimized) = (false, false);

        apply_resize(0, 0, &mut needs_resize, &mut is_minimized);
        assert!(is_minimized);
        assert!(!consume_rebuild(&mut needs_resize, is_minimized));

        apply_resize(1024, 768, &mut needs_resize, &mut is_minimized);
        assert!(!is_minimized);

        let mut rebuilds = 0;
        for _ in 0..3 {
            if consume_rebuild(&mut needs_resize, is_minimized) {
                rebuilds += 1;
            }
        }
        assert_eq!(rebuilds, 1);
    }

    #[test]
    fn partial_zero_counts_as_minimized() {
        let (mut needs_resize, mut is_minimized) = (false, false);
        apply_resize(800, 0, &mut needs_resize, &mut is_minimized);
        assert!(is_minimized);
        assert!(!needs_resize);
    }
}
