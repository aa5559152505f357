use image::RgbImage;

use super::DisplaySurface;
use crate::errors::CameraError;

/// In-memory display surface backing the on-screen camera view.
///
/// The UI reads `current_frame` and re-uploads its texture whenever
/// `frame_serial` moves.
#[derive(Debug, Default)]
pub struct FrameSurface {
    attached: bool,
    playing: bool,
    frame: Option<RgbImage>,
    serial: u64,
}

impl FrameSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySurface for FrameSurface {
    fn attach(&mut self) {
        self.attached = true;
        self.frame = None;
    }

    fn detach(&mut self) {
        self.attached = false;
        self.frame = None;
    }

    fn is_attached(&self) -> bool {
        self.attached
    }

    fn play(&mut self) -> Result<(), CameraError> {
        if !self.attached {
            return Err(CameraError::PlaybackBlocked);
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn present(&mut self, frame: RgbImage) {
        if !self.attached || !self.playing {
            return;
        }
        self.frame = Some(frame);
        self.serial = self.serial.wrapping_add(1);
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame
            .as_ref()
            .map(|frame| frame.dimensions())
            .unwrap_or((0, 0))
    }

    fn current_frame(&self) -> Option<&RgbImage> {
        self.frame.as_ref()
    }

    fn frame_serial(&self) -> u64 {
        self.serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_ignored_until_playing() {
        let mut surface = FrameSurface::new();
        surface.present(RgbImage::new(8, 8));
        assert_eq!(surface.frame_size(), (0, 0));

        surface.attach();
        surface.present(RgbImage::new(8, 8));
        assert_eq!(surface.frame_size(), (0, 0));

        surface.play().unwrap();
        surface.present(RgbImage::new(8, 6));
        assert_eq!(surface.frame_size(), (8, 6));
        assert_eq!(surface.frame_serial(), 1);
    }

    #[test]
    fn test_detach_clears_frame() {
        let mut surface = FrameSurface::new();
        surface.attach();
        surface.play().unwrap();
        surface.present(RgbImage::new(4, 4));

        surface.detach();
        assert!(surface.current_frame().is_none());
        assert_eq!(surface.frame_size(), (0, 0));
    }

    #[test]
    fn test_play_requires_attachment() {
        let mut surface = FrameSurface::new();
        assert_eq!(surface.play(), Err(CameraError::PlaybackBlocked));
    }
}
