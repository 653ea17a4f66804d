//! Windowed viewer.
//!
//! Owns the window, the wgpu backend and one scene renderer. Resize rebuilds
//! the window-sized targets before the next frame; ESC or closing the window
//! quits. Any device error is fatal: it is logged, the loop exits and the
//! error is returned from [`run`].

use std::sync::Arc;

use anyhow::Result;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::config::ViewerConfig;
use crate::cubemap::CubemapFaces;
use crate::gfx::wgpu_backend::WgpuBackend;
use crate::noise::{NoiseError, SimplexNoise};
use crate::render::{BloomRenderer, BloomSettings, SkyboxRenderer, SkyboxSettings};

/// Arrow-key rotation step in radians.
const VIEW_STEP: f32 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    Bloom,
    Skybox,
}

enum SceneRenderer {
    Bloom(BloomRenderer),
    Skybox(SkyboxRenderer),
}

struct Gpu {
    backend: WgpuBackend,
    scene: SceneRenderer,
}

struct ViewerApp {
    config: ViewerConfig,
    scene: Scene,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    error: Option<anyhow::Error>,
}

impl ViewerApp {
    fn new(config: ViewerConfig, scene: Scene) -> Self {
        Self {
            config,
            scene,
            window: None,
            gpu: None,
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    fn init_gpu(&self, window: Arc<Window>) -> Result<Gpu> {
        let mut backend = pollster::block_on(WgpuBackend::windowed(window, self.config.sample_count))?;
        let (width, height) = backend.default_size();
        let sample_count = backend.sample_count();

        let scene = match self.scene {
            Scene::Bloom => SceneRenderer::Bloom(BloomRenderer::new(
                &mut backend,
                BloomSettings {
                    width,
                    height,
                    sample_count,
                    blur_iterations: self.config.blur_iterations,
                },
            )?),
            Scene::Skybox => {
                let faces = build_skybox_faces(&self.config)?;
                SceneRenderer::Skybox(SkyboxRenderer::new(
                    &mut backend,
                    SkyboxSettings {
                        width,
                        height,
                        sample_count,
                    },
                    &faces,
                )?)
            }
        };
        Ok(Gpu { backend, scene })
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let Some(gpu) = &mut self.gpu else {
            return Ok(());
        };
        gpu.backend.resize(width, height);
        match &mut gpu.scene {
            SceneRenderer::Bloom(bloom) => bloom.resize(&mut gpu.backend, width, height)?,
            SceneRenderer::Skybox(sky) => sky.resize(width, height),
        }
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let Some(gpu) = &mut self.gpu else {
            return Ok(());
        };
        match &mut gpu.scene {
            SceneRenderer::Bloom(bloom) => {
                bloom.frame(&mut gpu.backend)?;
            }
            SceneRenderer::Skybox(sky) => sky.frame(&mut gpu.backend)?,
        }
        Ok(())
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, code: KeyCode) {
        if code == KeyCode::Escape {
            event_loop.exit();
            return;
        }
        let Some(Gpu {
            scene: SceneRenderer::Skybox(sky),
            ..
        }) = &mut self.gpu
        else {
            return;
        };
        match code {
            KeyCode::ArrowLeft => sky.rotate_view(-VIEW_STEP, 0.0),
            KeyCode::ArrowRight => sky.rotate_view(VIEW_STEP, 0.0),
            KeyCode::ArrowUp => sky.rotate_view(0.0, VIEW_STEP),
            KeyCode::ArrowDown => sky.rotate_view(0.0, -VIEW_STEP),
            _ => {}
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(self.config.width, self.config.height));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };

        match self.init_gpu(window.clone()) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => return self.fail(event_loop, e),
        }
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed {
                    if let PhysicalKey::Code(code) = event.physical_key {
                        self.handle_key(event_loop, code);
                    }
                }
            }

            WindowEvent::Resized(size) => {
                if let Err(e) = self.resize(size.width, size.height) {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    return self.fail(event_loop, e);
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }

            _ => (),
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(Gpu { mut backend, scene }) = self.gpu.take() {
            match scene {
                SceneRenderer::Bloom(bloom) => bloom.shutdown(&mut backend),
                SceneRenderer::Skybox(sky) => sky.shutdown(&mut backend),
            }
        }
    }
}

/// Generate the sky cubemap and write the debug dumps if configured.
pub fn build_skybox_faces(config: &ViewerConfig) -> Result<CubemapFaces, NoiseError> {
    let noise = SimplexNoise::initialized();
    let faces = CubemapFaces::generate(config.skybox.face_size, config.skybox.coloring, &noise)?;
    if let Some(dir) = &config.skybox.dump_dir {
        faces.dump_faces(dir);
    }
    Ok(faces)
}

/// Open the window and run `scene` until the user quits.
pub fn run(config: ViewerConfig, scene: Scene) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::new(config, scene);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
