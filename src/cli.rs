use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::app::{self, Scene};
use crate::config::ViewerConfig;
use crate::cubemap::Coloring;
use crate::gfx::wgpu_backend::WgpuBackend;
use crate::render::{BloomRenderer, BloomSettings};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON viewer config (camelCase fields, all optional)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rotating cube with a ping-pong blur (default)
    Bloom,

    /// Procedural skybox with a rotating lit cube
    Skybox {
        /// Cubemap coloring
        #[arg(long, value_enum)]
        coloring: Option<Coloring>,

        /// Directory to write pos_x.png / pos_y.png into
        #[arg(long)]
        dump_faces: Option<PathBuf>,
    },

    /// Render bloom frames to disk without a window
    Render {
        /// Output directory for frames
        #[arg(long)]
        out: PathBuf,

        /// Number of frames to render
        #[arg(long, default_value_t = 60)]
        frames: u32,

        /// Output width (defaults to the config width)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (defaults to the config height)
        #[arg(long)]
        height: Option<u32>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ViewerConfig::from_file(path).map_err(anyhow::Error::msg)?,
        None => ViewerConfig::default(),
    };

    match cli.command.unwrap_or(Commands::Bloom) {
        Commands::Bloom => {
            config.validate().map_err(anyhow::Error::msg)?;
            app::run(config, Scene::Bloom)
        }
        Commands::Skybox { coloring, dump_faces } => {
            if let Some(coloring) = coloring {
                config.skybox.coloring = coloring;
            }
            if dump_faces.is_some() {
                config.skybox.dump_dir = dump_faces;
            }
            config.validate().map_err(anyhow::Error::msg)?;
            app::run(config, Scene::Skybox)
        }
        Commands::Render { out, frames, width, height } => {
            config.width = width.unwrap_or(config.width);
            config.height = height.unwrap_or(config.height);
            config.validate().map_err(anyhow::Error::msg)?;
            pollster::block_on(render_offline(&config, &out, frames))
        }
    }
}

async fn render_offline(config: &ViewerConfig, out_dir: &Path, frames: u32) -> Result<()> {
    std::fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;

    let mut backend = WgpuBackend::headless(config.width, config.height, config.sample_count).await?;
    let (width, height) = backend.default_size();
    let settings = BloomSettings {
        width,
        height,
        sample_count: backend.sample_count(),
        blur_iterations: config.blur_iterations,
    };
    let mut renderer = BloomRenderer::new(&mut backend, settings)?;

    log::info!("Rendering {} frames to {:?}", frames, out_dir);

    for i in 0..frames {
        renderer.frame(&mut backend)?;
        let pixels = backend.read_default_target()?;

        let frame_path = out_dir.join(format!("frame_{:05}.png", i));
        image::save_buffer(&frame_path, &pixels, width, height, image::ColorType::Rgba8)
            .with_context(|| format!("Failed to write {:?}", frame_path))?;

        if i % 60 == 0 {
            log::debug!("Wrote frame {}", i);
        }
    }

    renderer.shutdown(&mut backend);
    log::info!("Done.");
    Ok(())
}
