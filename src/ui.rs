use eframe::egui;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;

use crate::encoder::FileResource;
use crate::session::{AppState, CameraMode, EstimationOutcome, Event, Phase, PreviewOrigin};
use crate::shell::Shell;

// ============================================================================
// CONSTANTS FOR UI STYLING
// ============================================================================
const VIEW_HEIGHT: f32 = 320.0;
const ACCENT: egui::Color32 = egui::Color32::from_rgb(16, 150, 110);
const CAMERA_REFRESH: Duration = Duration::from_millis(33);

pub struct CalorieSnapApp {
    pub state: AppState,
    pub shell: Shell,
    pub camera_texture: Option<egui::TextureHandle>,
    pub camera_serial: Option<u64>,
    pub preview_texture: Option<egui::TextureHandle>,
    pub preview_source: Option<Arc<RgbImage>>,
}

impl CalorieSnapApp {
    pub fn new(state: AppState, shell: Shell) -> Self {
        Self {
            state,
            shell,
            camera_texture: None,
            camera_serial: None,
            preview_texture: None,
            preview_source: None,
        }
    }
}

// ============================================================================
// MAIN UPDATE LOOP
// ============================================================================

impl eframe::App for CalorieSnapApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        self.shell.pump(&mut self.state);
        self.refresh_camera_texture(ctx);
        self.refresh_preview_texture(ctx);

        let mut events = Vec::new();
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.vertical_centered(|ui| {
                    self.render_header(ui);
                    self.render_result(ui);
                    match self.state.phase() {
                        Phase::NextSteps => render_next_steps(ui, &mut events),
                        Phase::Estimating => {}
                        Phase::LiveCamera => self.render_camera(ui, &mut events),
                        Phase::Uploader => self.render_uploader(ui, &mut events),
                    }
                });
            });
        });

        for event in events {
            self.shell.dispatch(&mut self.state, event);
        }

        // Completions arrive from background tasks; keep polling while any are due.
        if self.state.camera() != CameraMode::Off || self.state.is_loading() || self.state.is_encoding() {
            ctx.request_repaint_after(CAMERA_REFRESH);
        }
    }
}

// ============================================================================
// RENDERING
// ============================================================================

impl CalorieSnapApp {
    fn render_header(&self, ui: &mut egui::Ui) {
        ui.add_space(12.0);
        ui.heading(egui::RichText::new("CalorieSnap").color(ACCENT).size(32.0).strong());
        ui.label("Upload or capture a food image for an AI-powered calorie estimate.");
        ui.add_space(12.0);

        if self.state.credential_missing() {
            notice_frame(egui::Color32::from_rgb(255, 243, 205)).show(ui, |ui| {
                ui.label(
                    egui::RichText::new(
                        "Developer Notice: the API key is not set. Calorie estimation features will not function.",
                    )
                    .color(egui::Color32::from_rgb(133, 100, 4)),
                );
            });
            ui.add_space(8.0);
        }
    }

    fn render_result(&self, ui: &mut egui::Ui) {
        if self.state.is_loading() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label("Analyzing your food... This may take a moment.");
            });
            return;
        }

        let error = match self.state.outcome() {
            EstimationOutcome::Failure(message) => Some(message.as_str()),
            _ => self.state.error(),
        };
        if let Some(message) = error {
            notice_frame(egui::Color32::from_rgb(254, 226, 226)).show(ui, |ui| {
                ui.label(egui::RichText::new("Error").strong().color(egui::Color32::DARK_RED));
                ui.label(egui::RichText::new(message).color(egui::Color32::DARK_RED));
            });
            ui.add_space(8.0);
        }

        if let EstimationOutcome::Success(text) = self.state.outcome() {
            notice_frame(egui::Color32::from_rgb(220, 252, 231)).show(ui, |ui| {
                ui.label(egui::RichText::new("Estimation Result").strong().size(20.0));
                ui.label(text);
            });
            ui.add_space(8.0);
        }
    }

    fn render_camera(&self, ui: &mut egui::Ui, events: &mut Vec<Event>) {
        let width = ui.available_width();
        match &self.camera_texture {
            Some(texture) if self.state.camera() == CameraMode::Ready => {
                show_texture(ui, texture, egui::vec2(width, VIEW_HEIGHT));
            }
            _ => {
                let (rect, _) =
                    ui.allocate_exact_size(egui::vec2(width, VIEW_HEIGHT), egui::Sense::hover());
                ui.painter().rect_filled(rect, 8.0, egui::Color32::from_rgb(40, 40, 40));
                ui.painter().text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "Starting camera...",
                    egui::FontId::proportional(18.0),
                    egui::Color32::LIGHT_GRAY,
                );
            }
        }
        ui.add_space(8.0);

        let ready = self.state.camera() == CameraMode::Ready;
        if ui
            .add_enabled(ready, wide_button("Capture Food", width))
            .clicked()
        {
            events.push(Event::CaptureFromCamera);
        }
        if ui.add(wide_button("Close Camera", width)).clicked() {
            events.push(Event::ToggleCamera);
        }
    }

    fn render_uploader(&self, ui: &mut egui::Ui, events: &mut Vec<Event>) {
        let width = ui.available_width();

        if ui.add(wide_button("Choose Food Image", width)).clicked() {
            if let Some(path) = rfd::FileDialog::new()
                .add_filter("Image Files", &["png", "jpg", "jpeg", "webp", "heic", "heif", "gif", "bmp"])
                .add_filter("All Files", &["*"])
                .pick_file()
            {
                events.push(Event::SelectImage(Some(Arc::new(FileResource::new(path)))));
            }
        }
        ui.add_space(8.0);

        if self.state.is_encoding() {
            ui.spinner();
        }

        if let (Some(preview), Some(texture)) = (self.state.preview(), &self.preview_texture) {
            let caption = match preview.origin {
                PreviewOrigin::Upload => "Selected image:",
                PreviewOrigin::Capture => "Ready to analyze:",
            };
            ui.label(caption);
            show_texture(ui, texture, egui::vec2(width, VIEW_HEIGHT));
            if preview.origin == PreviewOrigin::Capture && ui.button("Clear captured image").clicked() {
                events.push(Event::ClearCapturedPreview);
            }
            ui.add_space(8.0);
        } else if let Some(image) = self.state.image() {
            ui.label(format!("Image ready ({}), no preview available.", image.media_type()));
        }

        if ui.add(wide_button("Use Live Camera", width)).clicked() {
            events.push(Event::ToggleCamera);
        }

        if self.state.image().is_some()
            && ui
                .add_enabled(
                    self.state.can_estimate(),
                    wide_button("Estimate Calories from Displayed Image", width),
                )
                .clicked()
        {
            events.push(Event::RequestEstimation);
        }
    }
}

fn render_next_steps(ui: &mut egui::Ui, events: &mut Vec<Event>) {
    let width = ui.available_width();
    ui.add_space(8.0);
    ui.label(egui::RichText::new("What would you like to do next?").strong());
    if ui.add(wide_button("Estimate Another Food", width)).clicked() {
        events.push(Event::ResetForNewEstimation);
    }
    if ui.add(wide_button("Start Over", width)).clicked() {
        events.push(Event::ResetForNewEstimation);
    }
}

fn wide_button(text: &str, width: f32) -> impl egui::Widget {
    egui::Button::new(egui::RichText::new(text.to_string()).size(18.0))
        .min_size(egui::vec2(width, 44.0))
}

fn notice_frame(fill: egui::Color32) -> egui::Frame {
    egui::Frame::none()
        .fill(fill)
        .rounding(8.0)
        .inner_margin(egui::Margin::symmetric(16.0, 12.0))
}

fn show_texture(ui: &mut egui::Ui, texture: &egui::TextureHandle, area: egui::Vec2) {
    let display_size = fit_image_in_rect(texture.size_vec2(), area);
    ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
}

// Helper function for image centering
fn fit_image_in_rect(image_size: egui::Vec2, container_size: egui::Vec2) -> egui::Vec2 {
    let scale = (container_size.x / image_size.x).min(container_size.y / image_size.y);
    image_size * scale
}
