use anyhow::Result;
use eframe::egui;
use log::info;
use std::sync::Arc;

use calorie_snap::camera::{CaptureController, FrameSurface, StreamSource, TestPatternSource};
use calorie_snap::config::{CameraBackend, Config};
use calorie_snap::estimation::{CommandEstimator, Credential};
use calorie_snap::{AppState, CalorieSnapApp, Shell};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting CalorieSnap");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded: {:?} camera at {}x{}",
        config.camera.backend, config.camera.width, config.camera.height
    );

    let credential = Credential::from_env(&config.estimation.credential_env);
    if credential.is_none() {
        log::warn!(
            "{} environment variable is not set. Calorie estimation will not work.",
            config.estimation.credential_env
        );
    }

    let state = AppState::new(credential.is_some());
    let estimator = Arc::new(CommandEstimator::new(&config.estimation, credential));
    let camera = CaptureController::with_surface(
        config.camera.jpeg_quality,
        Box::new(FrameSurface::new()),
    );
    let shell = Shell::new(
        tokio::runtime::Handle::current(),
        camera,
        stream_source(&config),
        estimator,
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([config.display.width as f32, config.display.height as f32])
            .with_min_inner_size([360.0, 480.0])
            .with_fullscreen(config.display.fullscreen),
        ..Default::default()
    };

    info!("Launching GUI application...");

    eframe::run_native(
        "CalorieSnap",
        options,
        Box::new(|cc| {
            setup_style(&cc.egui_ctx);
            Box::new(CalorieSnapApp::new(state, shell))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e))?;

    info!("Application shut down gracefully");
    Ok(())
}

fn stream_source(config: &Config) -> Arc<dyn StreamSource> {
    match config.camera.backend {
        #[cfg(feature = "camera")]
        CameraBackend::Libcamera => Arc::new(calorie_snap::camera::LibcameraSource::new(
            config.camera.width,
            config.camera.height,
            config.camera.jpeg_quality,
            config.frame_interval(),
            config.camera.frame_path.clone(),
        )),
        #[cfg(not(feature = "camera"))]
        CameraBackend::Libcamera => {
            log::warn!("Built without camera support, using test pattern");
            test_pattern(config)
        }
        CameraBackend::TestPattern => test_pattern(config),
    }
}

fn test_pattern(config: &Config) -> Arc<dyn StreamSource> {
    Arc::new(TestPatternSource::new(
        config.camera.width,
        config.camera.height,
        config.frame_interval(),
    ))
}

fn setup_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    style.spacing.button_padding = egui::vec2(16.0, 12.0);
    style.spacing.item_spacing = egui::vec2(12.0, 8.0);

    style.text_styles.insert(
        egui::TextStyle::Button,
        egui::FontId::new(18.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Body,
        egui::FontId::new(16.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Heading,
        egui::FontId::new(28.0, egui::FontFamily::Proportional),
    );

    ctx.set_style(style);
}
