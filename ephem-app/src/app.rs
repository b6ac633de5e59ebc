use std::sync::Arc;

use anyhow::Result;
use ephem_core::CANVAS_SIZE;
use ephem_render::SkiaDisplay;
use ephem_session::{
    CsvSettings, LoggingHopper, OperatorSettings, SessionError, SessionEvent, SessionStateMachine,
};
use ephem_timing::HighPrecisionTimer;
use pixels::{Pixels, SurfaceTexture};
use rand::rngs::ThreadRng;
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition},
    event::{ElementState, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

type Session = SessionStateMachine<SkiaDisplay, LoggingHopper, HighPrecisionTimer, ThreadRng>;

pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    session: Session,
    timer: HighPrecisionTimer,
    fullscreen: bool,
    cursor_visible: bool,
    cursor_pos: Option<PhysicalPosition<f64>>,

    should_exit: bool,
    failure: Option<SessionError>,
}

impl App {
    pub fn new(operator: OperatorSettings, settings: CsvSettings, fullscreen: bool) -> Result<Self> {
        let display = SkiaDisplay::new(CANVAS_SIZE.0, CANVAS_SIZE.1)?;
        let timer = HighPrecisionTimer::new();
        let session = SessionStateMachine::new(
            operator,
            Box::new(settings),
            display,
            LoggingHopper,
            timer.clone(),
            rand::rng(),
        );

        Ok(Self {
            window: None,
            pixels: None,
            session,
            timer,
            fullscreen,
            cursor_visible: false,
            cursor_pos: None,
            should_exit: false,
            failure: None,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Wait);
        tracing::info!(
            platform = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            "SPACE begins the session, ESC aborts, C toggles the cursor"
        );

        event_loop.run_app(&mut self)?;

        match self.failure.take() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let (width, height) = CANVAS_SIZE;
        let mut window_attributes = Window::default_attributes()
            .with_title("Ephemeral choice")
            .with_resizable(false);

        if self.fullscreen {
            let monitor = event_loop
                .primary_monitor()
                .or_else(|| event_loop.available_monitors().next())
                .ok_or_else(|| anyhow::anyhow!("No monitor available"))?;
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))));
        } else {
            window_attributes = window_attributes.with_inner_size(LogicalSize::new(width, height));
        }

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let physical_size = window.inner_size();
        tracing::info!(
            width = physical_size.width,
            height = physical_size.height,
            scale_factor = window.scale_factor(),
            "display configured"
        );

        let surface_texture =
            SurfaceTexture::new(physical_size.width, physical_size.height, window.clone());
        self.pixels = Some(Pixels::new(width, height, surface_texture)?);

        window.set_cursor_visible(self.cursor_visible);
        window.request_redraw();
        self.window = Some(window);

        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let Some(pixels) = self.pixels.as_mut() else {
            return Ok(());
        };
        self.session.display_mut().copy_into(pixels.frame_mut());
        pixels.render()?;
        Ok(())
    }

    fn dispatch(&mut self, event: SessionEvent, event_loop: &ActiveEventLoop) {
        match self.session.handle_event(event) {
            Ok(_) => {}
            Err(SessionError::AlreadyStarted(state)) => {
                tracing::warn!(%state, "session already running");
            }
            Err(e) => {
                tracing::error!(error = %e, "session failed");
                self.failure = Some(e);
            }
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
        if self.session.is_finished() || self.failure.is_some() {
            self.cleanup_and_exit(event_loop);
        }
    }

    /// Delivers due timers and arms the wake-up for the next one.
    fn pump_timers(&mut self, event_loop: &ActiveEventLoop) {
        for event in self.session.update() {
            self.dispatch(event, event_loop);
        }
        let flow = match self.session.next_deadline() {
            Some(deadline) => ControlFlow::WaitUntil(self.timer.instant_at(deadline)),
            None => ControlFlow::Wait,
        };
        event_loop.set_control_flow(flow);
    }

    fn handle_press(&mut self, x: f64, y: f64, event_loop: &ActiveEventLoop) {
        let Some(pixels) = &self.pixels else {
            return;
        };
        match pixels.window_pos_to_pixel((x as f32, y as f32)) {
            Ok((px, py)) => {
                self.dispatch(
                    SessionEvent::Click {
                        x: px as f32,
                        y: py as f32,
                    },
                    event_loop,
                );
            }
            Err(_) => tracing::debug!(x, y, "press outside the canvas"),
        }
    }

    fn handle_input(&mut self, key: PhysicalKey, event_loop: &ActiveEventLoop) {
        let PhysicalKey::Code(code) = key else {
            return;
        };
        match code {
            KeyCode::Space => self.dispatch(SessionEvent::Begin, event_loop),
            KeyCode::Escape => self.cleanup_and_exit(event_loop),
            KeyCode::KeyC => {
                self.cursor_visible = !self.cursor_visible;
                if let Some(window) = &self.window {
                    window.set_cursor_visible(self.cursor_visible);
                }
            }
            _ => {}
        }
    }

    fn handle_resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(new_size.width, new_size.height) {
                tracing::warn!(error = %e, "failed to resize surface");
            }
        }
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            return;
        }
        self.should_exit = true;

        if !self.session.is_finished() {
            if let Err(e) = self.session.handle_event(SessionEvent::Abort) {
                tracing::error!(error = %e, "session data may be incomplete");
                self.failure.get_or_insert(e);
            }
        }
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }

        let counters = self.session.counters();
        tracing::info!(
            state = ?self.session.state(),
            trials = counters.trials,
            reinforcers = counters.reinforcers,
            "session closed"
        );
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                tracing::error!(error = %e, "failed to create window and surface");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.cleanup_and_exit(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    tracing::error!(error = %e, "render failed");
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                self.handle_input(event.physical_key, event_loop);
            }
            WindowEvent::CursorMoved { position, .. } => self.cursor_pos = Some(position),
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                if let Some(pos) = self.cursor_pos {
                    self.handle_press(pos.x, pos.y, event_loop);
                }
            }
            WindowEvent::Touch(touch) if touch.phase == TouchPhase::Started => {
                self.handle_press(touch.location.x, touch.location.y, event_loop);
            }
            WindowEvent::Resized(sz) => self.handle_resize(sz),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = &self.window {
                    self.handle_resize(window.inner_size());
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            event_loop.exit();
            return;
        }
        self.pump_timers(event_loop);
    }
}

impl Drop for App {
    fn drop(&mut self) {
        tracing::debug!("application resources cleaned up");
    }
}
