//! rt-compute: real-time compute-shader ray tracer
//!
//! Renders two triangles with a compute shader into a shared image and
//! presents it through a full-screen graphics pass, synchronizing the
//! compute and graphics queues without host stalls between them.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use rt_compute::{
    app::App,
    config::AppConfig,
    scene::Scene,
    sync::Extent,
    vk::{headless::save_capture, HeadlessRenderer},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

#[derive(Parser)]
#[command(name = "rt-compute")]
#[command(version = "0.1.0")]
#[command(about = "Compute-shader triangle ray tracer")]
#[command(long_about = "
rt-compute ray traces a triangle scene in a compute shader and presents the
result through a graphics pass, overlapping the next compute write with
presentation of the current one.

Shaders are loaded as SPIR-V from render.shader_dir (default ./shaders).

Controls:
  P       pause/resume the light animation
  Escape  quit

Example usage:
  rt-compute --config config.yaml
  rt-compute capture --frames 10 --output frame.ppm
")]
struct Cli {
    /// Path to config file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Set logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a window and render until closed (default)
    Run {
        /// Override the shared image edge length
        #[arg(long)]
        target_size: Option<u32>,
        /// Enable the Vulkan validation layer
        #[arg(long)]
        validation: bool,
    },

    /// Validate configuration file
    CheckConfig,

    /// Render without a window and save the final image (PPM or PNG)
    Capture {
        /// Number of compute dispatches before the readback
        #[arg(short, long, default_value_t = 1)]
        frames: u32,
        /// Output file; the extension selects the format
        #[arg(short, long, default_value = "capture.ppm")]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = cli.log_level {
        logger.filter_level(level.into());
    }
    logger.init();

    let command = cli.command.unwrap_or(Commands::Run {
        target_size: None,
        validation: false,
    });

    match command {
        Commands::Run {
            target_size,
            validation,
        } => {
            let mut config = load_config_or_exit(cli.config.as_deref());
            if let Some(size) = target_size {
                config.render.target_size = size;
            }
            config.render.validation |= validation;
            config.validate()?;

            log::info!(
                "Window {}x{}, shared image {}, {} frames in flight",
                config.window.width,
                config.window.height,
                if config.render.follow_surface {
                    "follows surface".to_string()
                } else {
                    format!("{0}x{0}", config.render.target_size)
                },
                config.render.frames_in_flight
            );
            App::new(config, Scene::two_triangles()).run()?;
        }
        Commands::CheckConfig => {
            check_config(cli.config.as_deref());
        }
        Commands::Capture { frames, output } => {
            let config = load_config_or_exit(cli.config.as_deref());
            capture(&config, frames, &output)?;
        }
    }

    Ok(())
}

/// Validate configuration file
fn check_config(config_path: Option<&Path>) {
    match AppConfig::load_or_default(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid\n");
            println!("Window:");
            println!("  Title: {}", config.window.title);
            println!("  Size: {}x{}", config.window.width, config.window.height);
            println!("\nRender:");
            println!("  Target size: {}", config.render.target_size);
            println!("  Follow surface: {}", config.render.follow_surface);
            println!("  Frames in flight: {}", config.render.frames_in_flight);
            println!("  Present mode: {:?}", config.render.present_mode);
            match config.render.fence_timeout_ms {
                Some(ms) => println!("  Fence timeout: {}ms", ms),
                None => println!("  Fence timeout: unbounded"),
            }
            println!("  Validation: {}", config.render.validation);
            println!("  Shader dir: {}", config.render.shader_dir.display());
            println!(
                "  Prefer dedicated compute: {}",
                config.render.prefer_dedicated_compute
            );
            println!("\nScene:");
            println!("  Light: {:?}", config.scene.light_position);
            println!("  Camera: {:?} -> {:?}", config.scene.camera.position, config.scene.camera.look_at);
            println!("  FOV: {}", config.scene.camera.fov);
            println!("  Light orbit: {}", config.scene.light_orbit.enabled);
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

fn capture(config: &AppConfig, frames: u32, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let size = config.render.target_size;
    let mut renderer = HeadlessRenderer::new(config, &Scene::two_triangles(), Extent::new(size, size))?;
    let pixels = renderer.capture(frames)?;
    let extent = renderer.extent();
    save_capture(output, extent.width, extent.height, pixels)?;
    println!(
        "Wrote {}x{} image after {} frames to {}",
        extent.width,
        extent.height,
        frames.max(1),
        output.display()
    );
    Ok(())
}

/// Load configuration or exit with error
fn load_config_or_exit(config_path: Option<&Path>) -> AppConfig {
    match AppConfig::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            eprintln!("\nYou can copy config.yaml.default and modify it:");
            eprintln!("  cp config.yaml.default config.yaml");
            std::process::exit(1);
        }
    }
}
