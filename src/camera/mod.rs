//! Live camera lifecycle.
//!
//! [`CaptureController`] owns at most one hardware stream at a time and walks
//! it through `Inactive -> Acquiring -> Ready -> (Capturing | Closing) ->
//! Inactive`. Failures pass through `Errored` and always settle back on
//! `Inactive` with every resource released.
//!
//! Hardware callbacks (first frame, track ended) arrive as [`StreamEvent`]s
//! pulled from the stream by [`CaptureController::poll`], so every state
//! change goes through this one state machine.

use async_trait::async_trait;
use image::RgbImage;
use std::io::Cursor;

use crate::encoder::EncodedImage;
use crate::errors::CameraError;

#[cfg(feature = "camera")]
pub mod libcamera;
pub mod surface;
pub mod test_pattern;

#[cfg(feature = "camera")]
pub use libcamera::LibcameraSource;
pub use surface::FrameSurface;
pub use test_pattern::TestPatternSource;

pub const CAPTURE_MEDIA_TYPE: &str = "image/jpeg";
pub const DEFAULT_CAPTURE_QUALITY: u8 = 90;

/// Something that can hand out a live video stream.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// Hardware notifications for an open stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Frame(RgbImage),
    Ended,
}

pub trait VideoStream: Send {
    /// Next pending event, without blocking.
    fn poll_event(&mut self) -> Option<StreamEvent>;

    /// Stop every underlying track. Must be safe to call repeatedly.
    fn stop(&mut self);
}

/// The visual element the stream is attached to.
pub trait DisplaySurface: Send {
    fn attach(&mut self);
    fn detach(&mut self);
    fn is_attached(&self) -> bool;

    fn play(&mut self) -> Result<(), CameraError>;
    fn pause(&mut self);
    fn is_playing(&self) -> bool;

    /// Show a decoded frame. Ignored while detached or paused.
    fn present(&mut self, frame: RgbImage);

    /// Geometry of the visible frame, `(0, 0)` when nothing decodable is shown.
    fn frame_size(&self) -> (u32, u32);
    fn current_frame(&self) -> Option<&RgbImage>;

    /// Bumps every time a new frame becomes visible.
    fn frame_serial(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Inactive,
    Acquiring,
    Ready,
    Capturing,
    Closing,
    Errored(CameraError),
}

/// Outcomes the application has to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraNotice {
    Ready,
    Failed(CameraError),
}

/// A grabbed frame, already encoded for transport.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: EncodedImage,
    pub preview: RgbImage,
}

struct CameraSession {
    stream: Box<dyn VideoStream>,
}

pub struct CaptureController {
    state: CaptureState,
    surface: Option<Box<dyn DisplaySurface>>,
    session: Option<CameraSession>,
    attempt: u64,
    readiness_pending: bool,
    quality: u8,
}

impl CaptureController {
    pub fn new(quality: u8) -> Self {
        Self {
            state: CaptureState::Inactive,
            surface: None,
            session: None,
            attempt: 0,
            readiness_pending: false,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn with_surface(quality: u8, surface: Box<dyn DisplaySurface>) -> Self {
        let mut controller = Self::new(quality);
        controller.mount_surface(surface);
        controller
    }

    /// Swap the display surface. Any running session is closed first.
    pub fn mount_surface(&mut self, surface: Box<dyn DisplaySurface>) {
        self.close();
        self.surface = Some(surface);
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == CaptureState::Ready
    }

    pub fn holds_stream(&self) -> bool {
        self.session.is_some()
    }

    pub fn surface(&self) -> Option<&dyn DisplaySurface> {
        self.surface.as_deref()
    }

    /// Start acquiring. Returns the attempt id to hand back with the opened
    /// stream, or `None` when a session is already underway.
    pub fn activate(&mut self) -> Result<Option<u64>, CameraError> {
        if self.state != CaptureState::Inactive {
            log::debug!("Camera activation ignored in state {:?}", self.state);
            return Ok(None);
        }

        if self.surface.is_none() {
            log::error!("Camera activation without a display surface");
            return Err(self.fail(CameraError::SurfaceNotReady));
        }

        self.attempt += 1;
        self.state = CaptureState::Acquiring;
        log::info!("Acquiring camera stream (attempt {})", self.attempt);
        Ok(Some(self.attempt))
    }

    /// Feed the result of [`StreamSource::open`] for `attempt`.
    pub fn on_stream_opened(
        &mut self,
        attempt: u64,
        result: Result<Box<dyn VideoStream>, CameraError>,
    ) -> Option<CameraNotice> {
        if attempt != self.attempt || self.state != CaptureState::Acquiring {
            log::debug!("Discarding stream for stale attempt {}", attempt);
            if let Ok(mut stream) = result {
                stream.stop();
            }
            return None;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => return Some(CameraNotice::Failed(self.fail(e))),
        };
        self.session = Some(CameraSession { stream });

        let playback = match self.surface.as_mut() {
            Some(surface) => {
                surface.attach();
                surface.play()
            }
            None => Err(CameraError::SurfaceNotReady),
        };
        if let Err(e) = playback {
            log::error!("Camera playback rejected: {}", e);
            return Some(CameraNotice::Failed(self.fail(e)));
        }

        self.readiness_pending = true;
        log::info!("Camera stream attached, waiting for first frame");
        self.check_readiness()
    }

    /// Drain pending stream events.
    pub fn poll(&mut self) -> Option<CameraNotice> {
        let mut notice = None;
        loop {
            let event = match self.session.as_mut() {
                Some(session) => session.stream.poll_event(),
                None => break,
            };
            let Some(event) = event else { break };
            if let Some(n) = self.handle_stream_event(event) {
                notice = Some(n);
            }
        }
        notice
    }

    pub fn handle_stream_event(&mut self, event: StreamEvent) -> Option<CameraNotice> {
        match event {
            StreamEvent::Frame(frame) => {
                if let Some(surface) = self.surface.as_mut() {
                    surface.present(frame);
                }
                self.check_readiness()
            }
            StreamEvent::Ended => match self.state {
                CaptureState::Acquiring | CaptureState::Ready => {
                    log::warn!("Video track ended unexpectedly");
                    Some(CameraNotice::Failed(
                        self.fail(CameraError::StreamEndedUnexpectedly),
                    ))
                }
                _ => None,
            },
        }
    }

    fn check_readiness(&mut self) -> Option<CameraNotice> {
        if self.state != CaptureState::Acquiring || !self.readiness_pending {
            return None;
        }
        let (width, height) = self.frame_size();
        if width == 0 || height == 0 {
            return None;
        }

        self.readiness_pending = false;
        self.state = CaptureState::Ready;
        log::info!("Camera ready: {}x{}", width, height);
        Some(CameraNotice::Ready)
    }

    fn frame_size(&self) -> (u32, u32) {
        self.surface.as_ref().map(|s| s.frame_size()).unwrap_or((0, 0))
    }

    /// Grab the visible frame as JPEG and end the session.
    ///
    /// `FrameNotAvailable` leaves the controller untouched so the caller can
    /// retry.
    pub fn capture(&mut self) -> Result<CapturedFrame, CameraError> {
        if self.state != CaptureState::Ready {
            return Err(CameraError::FrameNotAvailable);
        }
        let (width, height) = self.frame_size();
        if width == 0 || height == 0 {
            log::warn!("Capture requested with zero frame dimensions");
            return Err(CameraError::FrameNotAvailable);
        }
        let Some(frame) = self.surface.as_ref().and_then(|s| s.current_frame()).cloned() else {
            return Err(CameraError::FrameNotAvailable);
        };

        self.state = CaptureState::Capturing;
        let encoded = match encode_jpeg(&frame, self.quality) {
            Ok(bytes) => EncodedImage::from_bytes(&bytes, CAPTURE_MEDIA_TYPE),
            Err(e) => return Err(self.fail(e)),
        };

        self.teardown();
        self.state = CaptureState::Inactive;
        log::info!("Captured {}x{} frame", width, height);
        Ok(CapturedFrame {
            image: encoded,
            preview: frame,
        })
    }

    /// Explicit deactivation. A no-op when already inactive.
    pub fn close(&mut self) {
        if self.state == CaptureState::Inactive {
            return;
        }
        self.state = CaptureState::Closing;
        self.teardown();
        self.state = CaptureState::Inactive;
        log::info!("Camera closed");
    }

    fn fail(&mut self, error: CameraError) -> CameraError {
        self.state = CaptureState::Errored(error.clone());
        self.teardown();
        self.state = CaptureState::Inactive;
        error
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stream.stop();
            log::debug!("Camera stream stopped");
        }
        self.readiness_pending = false;
        if let Some(surface) = self.surface.as_mut() {
            surface.detach();
            if surface.is_playing() {
                surface.pause();
            }
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, CameraError> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        encoder
            .encode_image(frame)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
    }
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted stream whose events are pushed by the test.
    pub struct ScriptedStream {
        pub events: Arc<Mutex<VecDeque<StreamEvent>>>,
        pub stopped: Arc<AtomicUsize>,
    }

    impl VideoStream for ScriptedStream {
        fn poll_event(&mut self) -> Option<StreamEvent> {
            self.events.lock().unwrap().pop_front()
        }

        fn stop(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    pub struct StreamHandle {
        pub events: Arc<Mutex<VecDeque<StreamEvent>>>,
        pub stopped: Arc<AtomicUsize>,
    }

    impl StreamHandle {
        pub fn stream(&self) -> Box<dyn VideoStream> {
            Box::new(ScriptedStream {
                events: Arc::clone(&self.events),
                stopped: Arc::clone(&self.stopped),
            })
        }

        pub fn push(&self, event: StreamEvent) {
            self.events.lock().unwrap().push_back(event);
        }

        pub fn stop_count(&self) -> usize {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    /// Source that returns a scripted stream or a fixed error.
    pub struct ScriptedSource {
        pub handle: StreamHandle,
        pub error: Option<CameraError>,
        pub opened: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamSource for ScriptedSource {
        async fn open(&self) -> Result<Box<dyn VideoStream>, CameraError> {
            self.opened.store(true, Ordering::SeqCst);
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(self.handle.stream()),
            }
        }
    }

    pub fn frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]))
    }

    /// Surface that refuses to play.
    pub struct BlockedSurface(pub FrameSurface);

    impl DisplaySurface for BlockedSurface {
        fn attach(&mut self) {
            self.0.attach()
        }
        fn detach(&mut self) {
            self.0.detach()
        }
        fn is_attached(&self) -> bool {
            self.0.is_attached()
        }
        fn play(&mut self) -> Result<(), CameraError> {
            Err(CameraError::PlaybackBlocked)
        }
        fn pause(&mut self) {
            self.0.pause()
        }
        fn is_playing(&self) -> bool {
            self.0.is_playing()
        }
        fn present(&mut self, frame: RgbImage) {
            self.0.present(frame)
        }
        fn frame_size(&self) -> (u32, u32) {
            self.0.frame_size()
        }
        fn current_frame(&self) -> Option<&RgbImage> {
            self.0.current_frame()
        }
        fn frame_serial(&self) -> u64 {
            self.0.frame_serial()
        }
    }
}
