//! # mwl-demo
//!
//! Small programs exercising the mwl API against a running compositor:
//! - `simple`: an empty window cleared to the configured color
//! - `draw`: a checkerboard redrawn every frame, logging resizes
//! - `input`: checkerboard plus a log line for every input event
//! - `fullscreen`: toggles fullscreen periodically and reports whether the
//!   compositor honored it

use std::cell::Cell;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};

use mwl::{ClientApi, Desc, MwlConfig, ScreenBuffer, ScrollAxis, ScrollSource, State, Window};

const CHECKER_DARK: u32 = 0xFF66_6666;
const CHECKER_LIGHT: u32 = 0xFFEE_EEEE;
const CHECKER_SIZE: i32 = 32;

/// Frames between fullscreen toggles
const FULLSCREEN_TOGGLE_FRAMES: u64 = 200;
/// Frames to wait for the compositor to confirm a fullscreen toggle
const FULLSCREEN_CONFIRM_FRAMES: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scene {
    Simple,
    Draw,
    Input,
    Fullscreen,
}

#[derive(Parser)]
#[command(name = "mwl-demo")]
#[command(about = "Demo scenes for the mwl minimal window layer")]
#[command(version)]
struct Cli {
    /// Scene to run
    #[arg(value_enum, default_value_t = Scene::Draw)]
    scene: Scene,

    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/mwl/mwl.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Window title
    #[arg(long, default_value = "Hello")]
    title: String,

    /// Initial window width
    #[arg(long, default_value_t = 1920)]
    width: i32,

    /// Initial window height
    #[arg(long, default_value_t = 1080)]
    height: i32,

    /// Stop after this many frames (0 runs until the window is closed)
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

/// Fill `buffer` with the demo checkerboard.
fn draw_checkerboard(buffer: &mut ScreenBuffer) {
    let width = buffer.width();
    for (y, row) in buffer.pixels_mut().chunks_exact_mut(width as usize).enumerate() {
        let y = y as i32;
        for (x, pixel) in row.iter_mut().enumerate() {
            let x = x as i32;
            *pixel = if (x + y / CHECKER_SIZE * CHECKER_SIZE) % (2 * CHECKER_SIZE) < CHECKER_SIZE {
                CHECKER_DARK
            } else {
                CHECKER_LIGHT
            };
        }
    }
}

fn present_checkerboard(window: &Window) {
    let mut buffer = window.fetch_screen_buffer();
    if !buffer.is_valid() {
        warn!("No screen buffer this frame");
        return;
    }
    draw_checkerboard(&mut buffer);
    window.present_screen_buffer(buffer);
}

fn install_input_logging(window: &Window) {
    window.set_key_callback(|event| {
        info!(
            "Key {:#x} (scancode {}) is {:?}{}",
            event.key,
            event.scancode,
            event.state,
            event
                .text
                .as_deref()
                .map(|t| format!(" text {:?}", t))
                .unwrap_or_default()
        );
    });

    window.set_mouse_motion_callback(|event| {
        info!("MouseMotionEvent(X: {}, Y: {})", event.x, event.y);
    });

    window.set_mouse_button_callback(|event| {
        info!("ButtonEvent(Button: {}, State: {:?})", event.button(), event.state());
    });

    window.set_mouse_scroll_callback(|event| {
        let source = match event.source() {
            ScrollSource::Wheel => "Wheel",
            ScrollSource::Finger => "Finger",
            ScrollSource::Continuous => "Continuous",
            ScrollSource::WheelTilt => "WheelTilt",
        };
        let axis = match event.axis() {
            ScrollAxis::Vertical => "Vertical",
            ScrollAxis::Horizontal => "Horizontal",
        };
        info!("ScrollEvent(Source: {}, Axis: {}, Value: {})", source, axis, event.value());
    });
}

fn run(cli: &Cli, config: MwlConfig) -> Result<()> {
    let state = State::create(Desc {
        client_api: ClientApi::Auto,
        config,
    })
    .context("Failed to connect to the display server")?;

    for output in state.outputs() {
        info!(
            "Output {}: {} {} mode={:?} scale={}",
            output.name.as_deref().unwrap_or("unnamed"),
            output.make,
            output.model,
            output.mode,
            output.scale
        );
    }

    let window = Window::create(&state, &cli.title, cli.width, cli.height)
        .context("Failed to create window")?;

    let running = Rc::new(Cell::new(true));
    let flag = Rc::clone(&running);
    window.set_close_callback(move || flag.set(false));
    window.add_close_callback(|| info!("Close requested"));

    if cli.scene != Scene::Simple {
        window.set_size_callback(|width, height| info!("Window Size = {}, {}", width, height));
    }
    if cli.scene == Scene::Input {
        install_input_logging(&window);
    }

    window.show();
    info!(
        "Window {}x{} at scale {}",
        window.width(),
        window.height(),
        window.scale_factor()
    );

    let mut frame: u64 = 0;
    let mut fullscreen = false;
    let mut confirm_at: Option<u64> = None;

    while running.get() {
        state.dispatch_events()?;
        frame += 1;

        if cli.scene == Scene::Fullscreen {
            if frame % FULLSCREEN_TOGGLE_FRAMES == 0 {
                fullscreen = !fullscreen;
                window.set_fullscreen_state(fullscreen);
                confirm_at = Some(frame + FULLSCREEN_CONFIRM_FRAMES);
            }
            // The compositor answers asynchronously; compare once it had time to
            if confirm_at == Some(frame) {
                confirm_at = None;
                if window.is_fullscreen() != fullscreen {
                    error!("Fullscreen not supported by the compositor?");
                    running.set(false);
                }
            }
        }

        if cli.scene != Scene::Simple {
            present_checkerboard(&window);
        }

        if cli.frames != 0 && frame >= cli.frames {
            info!("Stopping after {} frames", frame);
            break;
        }
    }

    let stats = state.buffer_stats();
    info!(
        "Buffers: {} created, {} destroyed",
        stats.created, stats.destroyed
    );

    window.destroy();
    state.destroy();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = MwlConfig::load(&cli.config);
    let filter = match (&loaded, cli.debug) {
        (_, true) => "debug".to_string(),
        (Ok(config), false) => config.log_filter().to_string(),
        (Err(_), false) => "info".to_string(),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    info!("Starting mwl-demo {} ({:?} scene)", mwl::VERSION, cli.scene);
    if let Some(commit) = option_env!("GIT_COMMIT") {
        info!("Built {} from {}", env!("BUILD_DATE"), commit);
    }

    let config = match loaded {
        Ok(config) => {
            info!("Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            warn!("Failed to load configuration: {:#}", e);
            info!("Using default configuration");
            MwlConfig::default()
        }
    };

    run(&cli, config)
}
