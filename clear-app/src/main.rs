#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::{
    fs::{self, File},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use hvk::{
    config::{RendererConfig, parse_clear_color},
    frame::{FrameLoop, FrameOutcome},
    renderer::Renderer,
    window::{WindowSource, wait_for_nonzero_framebuffer},
};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Info,
    Debug,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            //Off never installs a subscriber, so this arm is only for totality
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for hvk::log::VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => hvk::log::VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => hvk::log::VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => hvk::log::VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => hvk::log::VulkanLogLevel::Error,
        }
    }
}

/// Clear a window to a solid colour with Vulkan. ESC quits.
#[derive(clap::Parser, Debug)]
struct CliArgs {
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    /// Enable the validation layer, logging at this level and above
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
    /// Open a normal window instead of going fullscreen
    #[arg(long)]
    windowed: bool,
    #[arg(long, default_value_t = 1600)]
    width: u32,
    #[arg(long, default_value_t = 900)]
    height: u32,
    /// Clear colour as r,g,b,a with every channel in [0, 1]
    #[arg(long, default_value = "0.0,0.3,0.6,1.0", value_parser = parse_clear_color)]
    clear_color: [f32; 4],
}

impl CliArgs {
    fn window_attributes(&self) -> WindowAttributes {
        let attributes = Window::default_attributes().with_title("clear-app");
        if self.windowed {
            attributes.with_inner_size(LogicalSize {
                width: self.width,
                height: self.height,
            })
        } else {
            attributes.with_fullscreen(Some(Fullscreen::Borderless(None)))
        }
    }

    fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            app_name: "clear-app".to_owned(),
            validation: self.graphics_debug_level.map(Into::into),
            clear_color: self.clear_color,
            ..Default::default()
        }
    }
}

fn init_tracing(cli_args: &CliArgs) -> eyre::Result<()> {
    if cli_args.tracing_log_level == TracingLogLevel::Off {
        return Ok(());
    }

    let app_dirs = directories::ProjectDirs::from("", "hvk", "clear-app");
    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    fs::create_dir_all(&log_dir)?;

    let mut log_file_path = log_dir;
    log_file_path.push("log-file");
    log_file_path.set_extension("txt");
    let log_file = File::create(&log_file_path)?;
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    println!("log_file_path: {}", log_file_path.display());
    println!("cli_args: {:#?}", cli_args);

    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                    cli_args.tracing_log_level.into(),
                ))
                .and_then(file_log),
        )
        .init();
    Ok(())
}

/// Window state gathered from winit callbacks. The renderer lives outside
/// the handler and reads this between pumps.
#[derive(Debug)]
struct WindowEvents {
    attributes: WindowAttributes,
    window: Option<Arc<Window>>,
    creation_error: Option<String>,
    close_requested: bool,
    resized: bool,
}

impl WindowEvents {
    fn new(attributes: WindowAttributes) -> Self {
        Self {
            attributes,
            window: None,
            creation_error: None,
            close_requested: false,
            resized: false,
        }
    }
}

impl ApplicationHandler for WindowEvents {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(win) => {
                tracing::debug!("Created window {:?}", win.id());
                self.window = Some(Arc::new(win));
            }
            Err(e) => {
                tracing::error!("Error while creating window: {}", e);
                self.creation_error = Some(e.to_string());
                self.close_requested = true;
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        window_event: WindowEvent,
    ) {
        if self.window.as_ref().is_none_or(|w| w.id() != window_id) {
            return;
        }

        match window_event {
            WindowEvent::CloseRequested => {
                tracing::trace!("Close window request received for window");
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                tracing::trace!("Escape pressed, closing");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                tracing::trace!("Window resized to {}x{}", size.width, size.height);
                self.resized = true;
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                self.resized = true;
            }
            _ => {}
        }
    }
}

/// [`WindowSource`] over a winit event loop that is pumped rather than run.
struct PumpedWindow<'a> {
    event_loop: &'a mut EventLoop<()>,
    events: &'a mut WindowEvents,
}

impl PumpedWindow<'_> {
    /// Dispatch pending events. `None` blocks until at least one arrives.
    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self
            .event_loop
            .pump_app_events(timeout, &mut *self.events)
        {
            tracing::debug!("Event loop exited with code {code}");
            self.events.close_requested = true;
        }
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.events.resized)
    }
}

impl WindowSource for PumpedWindow<'_> {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.events.window.as_ref().map_or((0, 0), |w| {
            let size = w.inner_size();
            (size.width, size.height)
        })
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn should_close(&self) -> bool {
        self.events.close_requested
    }
}

fn main() -> eyre::Result<()> {
    let cli_args = CliArgs::parse();
    init_tracing(&cli_args)?;

    let mut event_loop = EventLoop::builder().build()?;
    let mut events = WindowEvents::new(cli_args.window_attributes());
    let mut window = PumpedWindow {
        event_loop: &mut event_loop,
        events: &mut events,
    };

    // winit hands out the window on the first resume.
    while window.events.window.is_none() && !window.should_close() {
        window.pump(None);
    }
    if let Some(e) = window.events.creation_error.take() {
        eyre::bail!("Error while creating window: {e}");
    }
    let Some(win) = window.events.window.clone() else {
        return Ok(());
    };
    let Some(extent) = wait_for_nonzero_framebuffer(&mut window) else {
        return Ok(());
    };

    //SAFETY: Loads vulkan via the system loader which is kinda unsafe but
    //we're fine
    let renderer = unsafe { Renderer::new(&cli_args.renderer_config(), win, extent) }?;
    let mut frames = FrameLoop::new(renderer);

    tracing::trace!("Entering main loop");
    let result = loop {
        window.pump(Some(Duration::ZERO));
        if window.should_close() {
            break Ok(());
        }
        if window.take_resized() {
            frames.notify_resized();
        }

        match frames.draw_frame(&mut window) {
            Ok(FrameOutcome::Skipped) => tracing::trace!("Frame skipped"),
            Ok(FrameOutcome::Presented { recreated: true }) => {
                tracing::debug!("Swapchain recreated after present");
            }
            Ok(FrameOutcome::Presented { recreated: false }) => {}
            Err(e) => {
                tracing::error!("Fatal error in frame stage {:?}: {e}", frames.stage());
                break Err(e);
            }
        }
    };

    tracing::info!("Presented {} frames", frames.frames_presented());
    // Renderer teardown waits for the GPU and must finish before the window
    // goes away.
    drop(frames);
    Ok(result?)
}
