use egui::{Context, TextureOptions};
use image::RgbImage;
use std::sync::Arc;

use crate::ui::CalorieSnapApp;

impl CalorieSnapApp {
    /// Upload the surface's newest frame when it changed since the last call.
    pub fn refresh_camera_texture(&mut self, ctx: &Context) {
        let Some(surface) = self.shell.camera().surface() else {
            return;
        };
        let serial = surface.frame_serial();
        if self.camera_serial == Some(serial) {
            return;
        }
        let Some(frame) = surface.current_frame() else {
            self.camera_texture = None;
            return;
        };
        // Skip frames without geometry to prevent a white flash
        if frame.width() == 0 || frame.height() == 0 {
            return;
        }

        let color_image = to_color_image(frame);
        match &mut self.camera_texture {
            Some(texture) if texture.size() == color_image.size => {
                texture.set(color_image, TextureOptions::LINEAR);
            }
            _ => {
                self.camera_texture =
                    Some(ctx.load_texture("camera_preview", color_image, TextureOptions::LINEAR));
            }
        }
        self.camera_serial = Some(serial);
    }

    /// Keep the preview texture in step with the session's preview image.
    pub fn refresh_preview_texture(&mut self, ctx: &Context) {
        let Some(preview) = self.state.preview() else {
            self.preview_texture = None;
            self.preview_source = None;
            return;
        };
        // Holding the Arc keeps its address unique while we compare against it.
        if let Some(shown) = &self.preview_source {
            if Arc::ptr_eq(shown, &preview.image) {
                return;
            }
        }
        let current = Arc::clone(&preview.image);

        let color_image = to_color_image(&preview.image);
        match &mut self.preview_texture {
            Some(texture) => texture.set(color_image, TextureOptions::LINEAR),
            None => {
                self.preview_texture =
                    Some(ctx.load_texture("image_preview", color_image, TextureOptions::LINEAR));
            }
        }
        self.preview_source = Some(current);
    }
}

fn to_color_image(image: &RgbImage) -> egui::ColorImage {
    let size = [image.width() as usize, image.height() as usize];
    let pixels = image.as_flat_samples();
    egui::ColorImage::from_rgb(size, pixels.as_slice())
}
