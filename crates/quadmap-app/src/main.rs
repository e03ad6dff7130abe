mod app;
mod control;
mod error;
mod gpu;
mod media;
mod playback;
mod project;
mod settings;
mod stage;
mod surface;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use crossbeam_channel::Receiver;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use app::App;
use gpu::{GpuContext, OutputKind, QuadCompositor, viewport_to_canvas};
use media::types::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use project::RestoreReport;
use settings::SettingsConfig;
use surface::Point;

/// One window with its own GPU context and compositor.
struct Output {
    kind: OutputKind,
    window: Arc<Window>,
    gpu: GpuContext,
    compositor: QuadCompositor,
    cursor: Option<Point>,
}

impl Output {
    fn new(kind: OutputKind, label: &'static str, window: Arc<Window>) -> Result<Self> {
        let gpu = GpuContext::new(label, window.clone())?;
        let compositor = QuadCompositor::new(&gpu.device, gpu.format);
        Ok(Self {
            kind,
            window,
            gpu,
            compositor,
            cursor: None,
        })
    }

    fn render(&mut self, app: &App, event_loop: &ActiveEventLoop) {
        let items = app.draw_list(self.kind);
        match self.compositor.render(&self.gpu, &items, app.stage.canvas()) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.gpu.reconfigure();
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("Out of GPU memory on {}", self.gpu.label);
                event_loop.exit();
            }
            Err(e) => {
                log::warn!("Surface error on {}: {e}", self.gpu.label);
            }
        }
    }
}

/// What a pending file dialog was opened for.
#[derive(Debug, Clone, Copy)]
enum DialogPurpose {
    AssignMedia,
    OpenProject,
    SaveProject,
    AssignSlot(usize),
}

struct QuadmapApp {
    settings: Option<SettingsConfig>,
    startup_project: Option<PathBuf>,
    app: Option<App>,
    preview: Option<Output>,
    fullscreen: Option<Output>,
    modifiers: ModifiersState,
    file_dialog_rx: Option<Receiver<(DialogPurpose, PathBuf)>>,
    next_tick: Instant,
}

impl QuadmapApp {
    fn new(settings: SettingsConfig, startup_project: Option<PathBuf>) -> Self {
        Self {
            settings: Some(settings),
            startup_project,
            app: None,
            preview: None,
            fullscreen: None,
            modifiers: ModifiersState::empty(),
            file_dialog_rx: None,
            next_tick: Instant::now(),
        }
    }

    fn output_mut(&mut self, id: WindowId) -> Option<&mut Output> {
        [self.preview.as_mut(), self.fullscreen.as_mut()]
            .into_iter()
            .flatten()
            .find(|o| o.window.id() == id)
    }

    fn open_dialog(&mut self, purpose: DialogPurpose) {
        if self.file_dialog_rx.is_some() {
            return;
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.file_dialog_rx = Some(rx);
        std::thread::Builder::new()
            .name("file-dialog".into())
            .spawn(move || {
                let dialog = rfd::FileDialog::new();
                let picked = match purpose {
                    DialogPurpose::AssignMedia => {
                        let all: Vec<&str> = VIDEO_EXTENSIONS
                            .iter()
                            .chain(IMAGE_EXTENSIONS)
                            .copied()
                            .collect();
                        dialog
                            .add_filter("All Media", &all)
                            .add_filter("Video", VIDEO_EXTENSIONS)
                            .add_filter("Images", IMAGE_EXTENSIONS)
                            .pick_file()
                    }
                    DialogPurpose::OpenProject | DialogPurpose::AssignSlot(_) => {
                        dialog.add_filter("Project", &["json"]).pick_file()
                    }
                    DialogPurpose::SaveProject => dialog
                        .add_filter("Project", &["json"])
                        .set_file_name("show.json")
                        .save_file(),
                };
                if let Some(path) = picked {
                    let _ = tx.send((purpose, path));
                }
            })
            .ok();
    }

    /// Apply a finished dialog, if any (non-blocking).
    fn poll_dialog(&mut self) {
        let Some(rx) = &self.file_dialog_rx else {
            return;
        };
        let (purpose, path) = match rx.try_recv() {
            Ok(picked) => picked,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                // Cancelled: the sender dropped without sending.
                self.file_dialog_rx = None;
                return;
            }
            Err(crossbeam_channel::TryRecvError::Empty) => return,
        };
        self.file_dialog_rx = None;
        let Some(app) = self.app.as_mut() else {
            return;
        };
        let now = Instant::now();
        match purpose {
            DialogPurpose::AssignMedia => {
                if let Err(e) = app.assign_media(&path, now) {
                    log::warn!("{e}");
                }
            }
            DialogPurpose::OpenProject => restore_interactive(app, &path),
            DialogPurpose::SaveProject => {
                if let Err(e) = app.save_project_to(&path) {
                    log::error!("Failed to save project: {e:#}");
                }
            }
            DialogPurpose::AssignSlot(slot) => match app.assign_slot(slot, &path) {
                Ok(()) => app.settings.save(),
                Err(e) => log::warn!("{e}"),
            },
        }
    }

    fn handle_key(&mut self, key: KeyCode, event_loop: &ActiveEventLoop) {
        let shift = self.modifiers.shift_key();
        let ctrl = self.modifiers.control_key();
        let alt = self.modifiers.alt_key();
        let Some(app) = self.app.as_mut() else {
            return;
        };
        let now = Instant::now();

        let result = match key {
            KeyCode::Escape => {
                app.quit_requested = true;
                Ok(())
            }
            KeyCode::KeyS if ctrl && shift => {
                self.open_dialog(DialogPurpose::SaveProject);
                Ok(())
            }
            KeyCode::KeyS if ctrl => {
                let name = app.projects.current_name().unwrap_or("untitled").to_string();
                if let Err(e) = app.save_project(&name) {
                    log::error!("Failed to save project '{name}': {e:#}");
                }
                Ok(())
            }
            KeyCode::KeyO if ctrl => {
                self.open_dialog(DialogPurpose::OpenProject);
                Ok(())
            }
            KeyCode::PageDown | KeyCode::PageUp if !app.projects.projects.is_empty() => {
                let n = app.projects.projects.len();
                let current = app.projects.current.unwrap_or(0);
                let index = if key == KeyCode::PageDown {
                    (current + 1) % n
                } else {
                    (current + n - 1) % n
                };
                match app.restore_index(index, now) {
                    Ok(report) => show_restore_problems(&report),
                    Err(e) => log::error!("Failed to load project: {e:#}"),
                }
                Ok(())
            }
            KeyCode::KeyN => {
                app.add_surface();
                Ok(())
            }
            KeyCode::Delete if ctrl => {
                if let Err(e) = app.delete_current_project() {
                    log::warn!("{e:#}");
                }
                Ok(())
            }
            KeyCode::Delete => app.delete_selected(now),
            KeyCode::Backspace => app.clear_selected_media(now),
            KeyCode::Tab => {
                app.cycle_selection(if shift { -1 } else { 1 });
                Ok(())
            }
            KeyCode::KeyR => app.rotate_selected(!shift),
            KeyCode::ArrowUp if shift => app.move_step(app.scheduler.cursor(), true, now),
            KeyCode::ArrowDown if shift => app.move_step(app.scheduler.cursor(), false, now),
            KeyCode::ArrowUp => app.adjust_opacity(0.1).map(|_| ()),
            KeyCode::ArrowDown => app.adjust_opacity(-0.1).map(|_| ()),
            KeyCode::KeyM => {
                app.toggle_mode(now);
                Ok(())
            }
            KeyCode::Space => {
                app.restart(now);
                Ok(())
            }
            KeyCode::KeyP => app.append_selected_step(now),
            KeyCode::KeyX => app.remove_last_step(now),
            KeyCode::KeyC => app.toggle_selected_continuous(now),
            KeyCode::KeyE => {
                app.toggle_edit_mode();
                Ok(())
            }
            KeyCode::KeyH => {
                app.toggle_controls();
                Ok(())
            }
            KeyCode::KeyB => {
                app.toggle_show();
                Ok(())
            }
            KeyCode::KeyL => {
                if let Err(e) = app.toggle_slot_loop(now) {
                    log::warn!("{e:#}");
                }
                Ok(())
            }
            KeyCode::KeyF => {
                if let Some(fps) = app.last_fps() {
                    log::info!("Preview: {fps:.1} fps");
                }
                Ok(())
            }
            KeyCode::KeyV | KeyCode::KeyI => {
                let selected = app.stage.surfaces().require_selected();
                if selected.is_ok() {
                    self.open_dialog(DialogPurpose::AssignMedia);
                }
                selected.map(|_| ())
            }
            _ => match slot_for_key(key).filter(|s| *s < app.slot_count()) {
                Some(slot) if shift => {
                    self.open_dialog(DialogPurpose::AssignSlot(slot));
                    Ok(())
                }
                Some(slot) if ctrl => app.toggle_slot_in_loop(slot).map(|_| ()),
                Some(slot) if alt => {
                    let cleared = app.clear_slot(slot);
                    if cleared.is_ok() {
                        app.settings.save();
                    }
                    cleared
                }
                Some(slot) => {
                    if let Err(e) = app.trigger_slot(slot, now) {
                        log::warn!("{e:#}");
                    }
                    Ok(())
                }
                None => Ok(()),
            },
        };

        if let Err(e) = result {
            log::warn!("{e}");
        }
        if self.app.as_ref().is_some_and(|a| a.quit_requested) {
            self.shutdown(event_loop);
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut app) = self.app.take() {
            app.shutdown();
        }
        self.fullscreen = None;
        self.preview = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for QuadmapApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.preview.is_some() {
            return;
        }
        let Some(settings) = self.settings.take() else {
            return;
        };

        let preview_attrs = WindowAttributes::default()
            .with_title("quadmap preview")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let preview_window = Arc::new(
            event_loop
                .create_window(preview_attrs)
                .expect("Failed to create preview window"),
        );

        let monitor = settings
            .output_monitor
            .and_then(|i| event_loop.available_monitors().nth(i))
            .or_else(|| event_loop.primary_monitor());
        if let Some(m) = &monitor {
            log::info!(
                "Fullscreen output on {}",
                m.name().unwrap_or_else(|| "unnamed monitor".into())
            );
        }
        let output_attrs = WindowAttributes::default()
            .with_title("quadmap output")
            .with_fullscreen(Some(Fullscreen::Borderless(monitor)));
        let output_window = Arc::new(
            event_loop
                .create_window(output_attrs)
                .expect("Failed to create output window"),
        );

        let outputs = Output::new(OutputKind::Preview, "quadmap-preview", preview_window)
            .and_then(|p| {
                Output::new(OutputKind::Fullscreen, "quadmap-output", output_window)
                    .map(|f| (p, f))
            });
        let (preview, fullscreen) = match outputs {
            Ok(outputs) => outputs,
            Err(e) => {
                log::error!("Failed to initialize GPU: {e:#}");
                event_loop.exit();
                return;
            }
        };

        match App::new(settings) {
            Ok(mut app) => {
                if let Some(path) = self.startup_project.take() {
                    restore_interactive(&mut app, &path);
                }
                self.app = Some(app);
                log::info!("quadmap initialized");
            }
            Err(e) => {
                log::error!("Failed to initialize app: {e:#}");
                event_loop.exit();
                return;
            }
        }
        self.preview = Some(preview);
        self.fullscreen = Some(fullscreen);
        self.next_tick = Instant::now();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.app.is_none() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.shutdown(event_loop);
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers = modifiers.state();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                self.handle_key(key, event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Some(output) = self.output_mut(window_id) {
                    output.gpu.resize(size.width, size.height);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let Some(canvas) = self.app.as_ref().map(|a| a.stage.canvas()) else {
                    return;
                };
                let Some(output) = self.output_mut(window_id) else {
                    return;
                };
                output.cursor =
                    viewport_to_canvas((position.x, position.y), output.gpu.viewport(), canvas);
                let (kind, cursor) = (output.kind, output.cursor);
                if let (Some(p), Some(app)) = (cursor, self.app.as_mut()) {
                    app.pointer_moved(kind, p);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let Some((kind, cursor)) = self.output_mut(window_id).map(|o| (o.kind, o.cursor))
                else {
                    return;
                };
                let Some(app) = self.app.as_mut() else {
                    return;
                };
                match (state, cursor) {
                    (ElementState::Pressed, Some(p)) => {
                        app.pointer_pressed(kind, p);
                    }
                    (ElementState::Released, _) => app.pointer_released(),
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(app) = self.app.as_mut() else {
                    return;
                };
                let is_preview = self
                    .preview
                    .as_ref()
                    .is_some_and(|o| o.window.id() == window_id);
                let output = if is_preview {
                    self.preview.as_mut()
                } else {
                    self.fullscreen.as_mut()
                };
                if let Some(output) = output {
                    output.render(app, event_loop);
                }
                if is_preview {
                    app.frame_rendered(Instant::now());
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        if now >= self.next_tick {
            self.poll_dialog();
            let Some(app) = self.app.as_mut() else {
                return;
            };
            app.tick(now);
            self.next_tick = now + app.settings.render_interval();
            for output in [self.preview.as_ref(), self.fullscreen.as_ref()]
                .into_iter()
                .flatten()
            {
                output.window.request_redraw();
            }
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_tick));
    }
}

fn slot_for_key(key: KeyCode) -> Option<usize> {
    match key {
        KeyCode::Digit1 => Some(0),
        KeyCode::Digit2 => Some(1),
        KeyCode::Digit3 => Some(2),
        KeyCode::Digit4 => Some(3),
        KeyCode::Digit5 => Some(4),
        _ => None,
    }
}

/// Restore a project the operator asked for, surfacing problems in a dialog.
fn restore_interactive(app: &mut App, path: &std::path::Path) {
    match app.restore_from(path, Instant::now()) {
        Ok(report) => show_restore_problems(&report),
        Err(e) => {
            log::error!("Failed to load {}: {e:#}", path.display());
            show_message("Could not open project", format!("{}\n\n{e:#}", path.display()));
        }
    }
}

fn show_restore_problems(report: &RestoreReport) {
    if !report.is_clean() {
        show_message("Project restored with problems", report.skipped.join("\n"));
    }
}

fn show_message(title: &'static str, description: String) {
    std::thread::Builder::new()
        .name("message-dialog".into())
        .spawn(move || {
            rfd::MessageDialog::new()
                .set_level(rfd::MessageLevel::Warning)
                .set_title(title)
                .set_description(description)
                .set_buttons(rfd::MessageButtons::Ok)
                .show();
        })
        .ok();
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let settings = SettingsConfig::load();
    let startup_project = std::env::args_os().nth(1).map(PathBuf::from);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = QuadmapApp::new(settings, startup_project);
    event_loop.run_app(&mut app)?;

    Ok(())
}
