//! Application state and its transitions.
//!
//! [`AppState::update`] applies one event and returns the side effects the
//! shell must run. It never performs I/O itself. Every suspending effect is
//! tagged with the [`Generation`] current when it was issued, and completions
//! from an older generation are dropped.

use image::RgbImage;
use std::sync::Arc;

use crate::encoder::{EncodedImage, ImageSource};
use crate::errors::{CameraError, EncodeError, EstimationError};

/// Monotonic tag for in-flight work; bumped by every state-clearing action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstimationOutcome {
    Idle,
    Pending,
    Success(String),
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    Off,
    Starting,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOrigin {
    Upload,
    Capture,
}

#[derive(Debug, Clone)]
pub struct Preview {
    pub origin: PreviewOrigin,
    pub image: Arc<RgbImage>,
}

/// An encoded image and, when decodable, its pixels for display.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub image: EncodedImage,
    pub preview: Option<RgbImage>,
}

/// Which view the UI shows. Derived from the state, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uploader,
    LiveCamera,
    Estimating,
    NextSteps,
}

#[derive(Debug)]
pub enum Event {
    // User intents
    SelectImage(Option<Arc<dyn ImageSource>>),
    ToggleCamera,
    CaptureFromCamera,
    RequestEstimation,
    ResetForNewEstimation,
    ClearCapturedPreview,

    // Completions
    ImageEncoded {
        generation: Generation,
        result: Result<Acquired, EncodeError>,
    },
    CameraReady,
    CameraFailed(CameraError),
    FrameCaptured {
        generation: Generation,
        result: Result<Acquired, CameraError>,
    },
    EstimationFinished {
        generation: Generation,
        result: Result<String, EstimationError>,
    },
}

#[derive(Debug)]
pub enum Effect {
    Encode {
        generation: Generation,
        source: Arc<dyn ImageSource>,
    },
    StartCamera,
    StopCamera,
    CaptureFrame {
        generation: Generation,
    },
    Estimate {
        generation: Generation,
        image: EncodedImage,
    },
}

#[derive(Debug)]
pub struct AppState {
    generation: Generation,
    image: Option<EncodedImage>,
    preview: Option<Preview>,
    outcome: EstimationOutcome,
    error: Option<String>,
    camera: CameraMode,
    encoding: bool,
    next_steps_visible: bool,
    credential_present: bool,
}

impl AppState {
    pub fn new(credential_present: bool) -> Self {
        Self {
            generation: Generation::default(),
            image: None,
            preview: None,
            outcome: EstimationOutcome::Idle,
            error: None,
            camera: CameraMode::Off,
            encoding: false,
            next_steps_visible: false,
            credential_present,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn image(&self) -> Option<&EncodedImage> {
        self.image.as_ref()
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn outcome(&self) -> &EstimationOutcome {
        &self.outcome
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn camera(&self) -> CameraMode {
        self.camera
    }

    pub fn is_encoding(&self) -> bool {
        self.encoding
    }

    pub fn is_loading(&self) -> bool {
        self.outcome == EstimationOutcome::Pending
    }

    pub fn credential_missing(&self) -> bool {
        !self.credential_present
    }

    pub fn next_steps_visible(&self) -> bool {
        self.next_steps_visible && matches!(self.outcome, EstimationOutcome::Success(_))
    }

    pub fn can_estimate(&self) -> bool {
        self.image.is_some() && !self.is_loading() && self.credential_present
    }

    pub fn phase(&self) -> Phase {
        if self.is_loading() {
            Phase::Estimating
        } else if self.next_steps_visible() {
            Phase::NextSteps
        } else if self.camera != CameraMode::Off {
            Phase::LiveCamera
        } else {
            Phase::Uploader
        }
    }

    pub fn update(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            Event::SelectImage(source) => {
                self.camera_off(&mut effects);
                self.clear();

                let Some(source) = source else {
                    return effects;
                };
                if !source.declared_type().starts_with("image/") {
                    self.error =
                        Some(EncodeError::UnsupportedType(source.declared_type().to_string()).to_string());
                    return effects;
                }

                log::info!("Selected image {}", source.name());
                self.encoding = true;
                effects.push(Effect::Encode {
                    generation: self.generation,
                    source,
                });
            }

            Event::ToggleCamera => {
                self.clear();
                if self.camera == CameraMode::Off {
                    self.camera = CameraMode::Starting;
                    effects.push(Effect::StartCamera);
                } else {
                    self.camera_off(&mut effects);
                }
            }

            Event::CaptureFromCamera => {
                if self.camera != CameraMode::Ready {
                    self.error = Some("Camera not ready or stream inactive for capture.".to_string());
                    return effects;
                }
                self.clear();
                effects.push(Effect::CaptureFrame {
                    generation: self.generation,
                });
            }

            Event::RequestEstimation => {
                if self.is_loading() {
                    log::debug!("Estimation already pending, ignoring request");
                    return effects;
                }
                let Some(image) = self.image.clone() else {
                    self.error = Some("Please upload or capture an image first.".to_string());
                    return effects;
                };

                self.error = None;
                self.next_steps_visible = false;
                if !self.credential_present {
                    self.outcome =
                        EstimationOutcome::Failure(EstimationError::ConfigurationMissing.to_string());
                    return effects;
                }

                self.outcome = EstimationOutcome::Pending;
                effects.push(Effect::Estimate {
                    generation: self.generation,
                    image,
                });
            }

            Event::ResetForNewEstimation => {
                self.clear();
                self.camera_off(&mut effects);
                log::info!("State reset for new estimation");
            }

            Event::ClearCapturedPreview => {
                if matches!(&self.preview, Some(p) if p.origin == PreviewOrigin::Capture) {
                    self.clear();
                }
            }

            Event::ImageEncoded { generation, result } => {
                if self.is_stale(generation, "encode") {
                    return effects;
                }
                self.encoding = false;
                match result {
                    Ok(acquired) => self.store(acquired, PreviewOrigin::Upload),
                    Err(e) => {
                        log::error!("Image processing error: {}", e);
                        self.error = Some(e.to_string());
                        self.image = None;
                        self.preview = None;
                    }
                }
            }

            Event::CameraReady => {
                if self.camera == CameraMode::Starting {
                    self.camera = CameraMode::Ready;
                    self.error = None;
                }
            }

            Event::CameraFailed(e) => {
                if self.camera != CameraMode::Off {
                    log::error!("Camera failure: {}", e);
                    self.camera = CameraMode::Off;
                    self.error = Some(e.to_string());
                }
            }

            Event::FrameCaptured { generation, result } => {
                if self.is_stale(generation, "capture") {
                    return effects;
                }
                match result {
                    Ok(acquired) => {
                        self.camera = CameraMode::Off;
                        self.store(acquired, PreviewOrigin::Capture);
                    }
                    Err(e) if e.is_recoverable_in_session() => {
                        self.error = Some(e.to_string());
                    }
                    Err(e) => {
                        self.camera = CameraMode::Off;
                        self.error = Some(e.to_string());
                    }
                }
            }

            Event::EstimationFinished { generation, result } => {
                if self.is_stale(generation, "estimation") || !self.is_loading() {
                    return effects;
                }
                match result {
                    Ok(text) => {
                        self.outcome = EstimationOutcome::Success(text);
                        self.next_steps_visible = true;
                        self.error = None;
                    }
                    Err(e) => {
                        log::error!("Error estimating calories: {}", e);
                        self.outcome = EstimationOutcome::Failure(e.user_message());
                        self.next_steps_visible = false;
                    }
                }
            }
        }

        effects
    }

    fn is_stale(&self, generation: Generation, what: &str) -> bool {
        if generation != self.generation {
            log::debug!(
                "Discarding stale {} result ({:?} != {:?})",
                what,
                generation,
                self.generation
            );
            return true;
        }
        false
    }

    fn store(&mut self, acquired: Acquired, origin: PreviewOrigin) {
        self.preview = acquired.preview.map(|image| Preview {
            origin,
            image: Arc::new(image),
        });
        self.image = Some(acquired.image);
    }

    fn camera_off(&mut self, effects: &mut Vec<Effect>) {
        if self.camera != CameraMode::Off {
            self.camera = CameraMode::Off;
            effects.push(Effect::StopCamera);
        }
    }

    fn clear(&mut self) {
        self.generation = self.generation.next();
        self.image = None;
        self.preview = None;
        self.outcome = EstimationOutcome::Idle;
        self.error = None;
        self.encoding = false;
        self.next_steps_visible = false;
    }
}
