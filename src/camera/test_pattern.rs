use async_trait::async_trait;
use image::{ImageBuffer, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::{StreamEvent, StreamSource, VideoStream};
use crate::errors::CameraError;

/// Synthetic camera producing an animated gradient, for machines without
/// camera hardware.
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    interval: Duration,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, interval: Duration) -> Self {
        Self {
            width,
            height,
            interval,
        }
    }
}

#[async_trait]
impl StreamSource for TestPatternSource {
    async fn open(&self) -> Result<Box<dyn VideoStream>, CameraError> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::DeviceNotFound);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let (width, height, interval) = (self.width, self.height, self.interval);
        let thread_running = Arc::clone(&running);

        std::thread::Builder::new()
            .name("test-pattern".into())
            .spawn(move || {
                let start = Instant::now();
                while thread_running.load(Ordering::Relaxed) {
                    let frame = pattern_frame(width, height, start.elapsed().as_secs_f32());
                    if sender.send(StreamEvent::Frame(frame)).is_err() {
                        break;
                    }
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| CameraError::Backend(e.to_string()))?;

        log::info!("Test pattern camera started: {}x{}", width, height);
        Ok(Box::new(TestPatternStream { receiver, running }))
    }
}

struct TestPatternStream {
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
    running: Arc<AtomicBool>,
}

impl VideoStream for TestPatternStream {
    fn poll_event(&mut self) -> Option<StreamEvent> {
        // Only the newest frame matters for display.
        let mut latest = None;
        while let Ok(event) = self.receiver.try_recv() {
            latest = Some(event);
        }
        latest
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::Relaxed) {
            log::debug!("Test pattern camera stopped");
        }
    }
}

impl Drop for TestPatternStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pattern_frame(width: u32, height: u32, time: f32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        let r = ((x as f32 / width as f32 * 255.0) + (time * 5.0).sin() * 50.0) as u8;
        let g = ((y as f32 / height as f32 * 255.0) + (time * 3.0).cos() * 50.0) as u8;
        let b = (((x + y) as f32 / (width + height) as f32 * 255.0) + (time * 7.0).sin() * 50.0) as u8;
        image::Rgb([r.saturating_add(60), g.saturating_add(60), b.saturating_add(60)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pattern_stream_delivers_frames() {
        let source = TestPatternSource::new(32, 24, Duration::from_millis(5));
        let mut stream = source.open().await.unwrap();

        let mut frame = None;
        for _ in 0..200 {
            if let Some(StreamEvent::Frame(f)) = stream.poll_event() {
                frame = Some(f);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(frame.unwrap().dimensions(), (32, 24));

        stream.stop();
        stream.stop();
    }

    #[tokio::test]
    async fn test_zero_size_pattern_is_rejected() {
        let source = TestPatternSource::new(0, 24, Duration::from_millis(5));
        assert!(matches!(source.open().await, Err(CameraError::DeviceNotFound)));
    }
}
