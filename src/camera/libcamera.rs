use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;
use tokio::time::{sleep, Duration};

use super::{StreamEvent, StreamSource, VideoStream};
use crate::errors::CameraError;

const CAPTURE_TOOL: &str = "rpicam-still";
const STDERR_TAIL_LINES: usize = 32;

/// Camera source for the Raspberry Pi camera stack.
///
/// `rpicam-still` runs in timelapse mode and keeps rewriting one JPEG file;
/// the stream decodes that file whenever it changes.
#[derive(Debug, Clone)]
pub struct LibcameraSource {
    program: String,
    width: u32,
    height: u32,
    quality: u8,
    interval: Duration,
    frame_path: PathBuf,
}

impl LibcameraSource {
    pub fn new(width: u32, height: u32, quality: u8, interval: Duration, frame_path: PathBuf) -> Self {
        Self {
            program: CAPTURE_TOOL.to_string(),
            width,
            height,
            quality: quality.min(100),
            interval,
            frame_path,
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-o".into(),
            self.frame_path.display().to_string(),
            "--width".into(),
            self.width.to_string(),
            "--height".into(),
            self.height.to_string(),
            "--quality".into(),
            self.quality.to_string(),
            "--timeout".into(),
            "0".into(), // Run until stopped
            "--timelapse".into(),
            self.interval.as_millis().to_string(),
            "--nopreview".into(),
        ]
    }
}

#[async_trait]
impl StreamSource for LibcameraSource {
    async fn open(&self) -> Result<Box<dyn VideoStream>, CameraError> {
        if self.frame_path.exists() {
            let _ = tokio::fs::remove_file(&self.frame_path).await;
        }

        let args = self.args();
        log::info!("Preview command: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| classify_spawn_error(&e))?;
        let stderr = StderrTail::drain(child.stderr.take());

        // Give the camera a moment; device errors make the tool exit right away.
        sleep(Duration::from_millis(500)).await;

        match child.try_wait() {
            Ok(Some(status)) => {
                let stderr = stderr.finish();
                log::error!("{} exited with {}: {}", CAPTURE_TOOL, status, stderr.trim());
                Err(classify_stderr(&stderr))
            }
            Ok(None) => {
                log::info!("Camera preview started successfully");
                Ok(Box::new(LibcameraStream {
                    child: Some(child),
                    stderr,
                    frame_path: self.frame_path.clone(),
                    last_modified: None,
                }))
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(CameraError::Backend(e.to_string()))
            }
        }
    }
}

/// Keeps the newest lines the tool writes to stderr.
///
/// The pipe is read on its own thread for the life of the process; an
/// undrained pipe fills up and stalls the tool mid-write.
#[derive(Default)]
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    reader: Option<JoinHandle<()>>,
}

impl StderrTail {
    fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let mut tail = Self::default();
        let Some(pipe) = pipe else { return tail };

        let lines = Arc::clone(&tail.lines);
        tail.reader = Some(std::thread::spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                        log::debug!("{}: {}", CAPTURE_TOOL, line);
                        if let Ok(mut lines) = lines.lock() {
                            if lines.len() == STDERR_TAIL_LINES {
                                lines.pop_front();
                            }
                            lines.push_back(line);
                        }
                    }
                }
            }
        }));
        tail
    }

    fn text(&self) -> String {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// Wait for the pipe to close, then return what was kept.
    fn finish(mut self) -> String {
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.text()
    }
}

struct LibcameraStream {
    child: Option<Child>,
    stderr: StderrTail,
    frame_path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl LibcameraStream {
    fn read_frame_if_changed(&mut self) -> Option<image::RgbImage> {
        let modified = std::fs::metadata(&self.frame_path)
            .and_then(|meta| meta.modified())
            .ok()?;
        if self.last_modified == Some(modified) {
            return None;
        }

        // The tool may be halfway through rewriting the file; try again next poll.
        match image::open(&self.frame_path) {
            Ok(img) => {
                self.last_modified = Some(modified);
                Some(img.to_rgb8())
            }
            Err(e) => {
                log::debug!("Frame not decodable yet: {}", e);
                None
            }
        }
    }
}

impl VideoStream for LibcameraStream {
    fn poll_event(&mut self) -> Option<StreamEvent> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(None) => self.read_frame_if_changed().map(StreamEvent::Frame),
            Ok(Some(status)) => {
                log::warn!("{} exited with {}: {}", CAPTURE_TOOL, status, self.stderr.text().trim());
                self.child = None;
                Some(StreamEvent::Ended)
            }
            Err(e) => {
                log::error!("Failed to query {}: {}", CAPTURE_TOOL, e);
                self.stop();
                Some(StreamEvent::Ended)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.child.take() {
            let _ = process.kill();
            let _ = process.wait();
            log::info!("Camera preview stopped");
        }
        remove_frame_file(&self.frame_path);
    }
}

impl Drop for LibcameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn remove_frame_file(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}

fn classify_spawn_error(error: &std::io::Error) -> CameraError {
    match error.kind() {
        ErrorKind::NotFound => CameraError::ApiUnavailable(CAPTURE_TOOL.to_string()),
        ErrorKind::PermissionDenied => CameraError::PermissionDenied,
        _ => CameraError::Backend(error.to_string()),
    }
}

/// Map the tool's diagnostics onto the camera failure kinds.
pub fn classify_stderr(stderr: &str) -> CameraError {
    let lower = stderr.to_lowercase();
    if lower.contains("no cameras available") || lower.contains("no camera") {
        CameraError::DeviceNotFound
    } else if lower.contains("device or resource busy") || lower.contains("failed to acquire camera") {
        CameraError::DeviceBusyOrHardware
    } else if lower.contains("permission denied") {
        CameraError::PermissionDenied
    } else if lower.contains("operation not permitted") {
        CameraError::InsecureContext
    } else if stderr.trim().is_empty() {
        CameraError::StreamEndedUnexpectedly
    } else {
        let detail = stderr.lines().last().unwrap_or_default().trim().to_string();
        CameraError::Backend(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stderr() {
        assert_eq!(
            classify_stderr("ERROR: *** no cameras available ***"),
            CameraError::DeviceNotFound
        );
        assert_eq!(
            classify_stderr("failed to acquire camera /base/soc/i2c0mux"),
            CameraError::DeviceBusyOrHardware
        );
        assert_eq!(
            classify_stderr("open /dev/video0: Permission denied"),
            CameraError::PermissionDenied
        );
        assert_eq!(
            classify_stderr("ioctl: Operation not permitted"),
            CameraError::InsecureContext
        );
        assert_eq!(classify_stderr(""), CameraError::StreamEndedUnexpectedly);
        assert_eq!(
            classify_stderr("warming up\nsensor timeout"),
            CameraError::Backend("sensor timeout".into())
        );
    }

    #[test]
    fn test_missing_tool_is_api_unavailable() {
        let err = std::io::Error::new(ErrorKind::NotFound, "not found");
        assert_eq!(
            classify_spawn_error(&err),
            CameraError::ApiUnavailable("rpicam-still".into())
        );
    }

    #[test]
    fn test_preview_args() {
        let source = LibcameraSource::new(
            800,
            600,
            90,
            Duration::from_millis(100),
            PathBuf::from("/tmp/frame.jpg"),
        );
        let args = source.args();
        assert_eq!(args[1], "/tmp/frame.jpg");
        assert!(args.windows(2).any(|w| w[0] == "--timelapse" && w[1] == "100"));
        assert!(args.windows(2).any(|w| w[0] == "--quality" && w[1] == "90"));
    }

    #[cfg(unix)]
    #[test]
    fn test_stderr_is_drained_while_running() {
        // 40 lines of 4 KiB is well past a pipe buffer.
        let mut child = Command::new("sh")
            .args([
                "-c",
                "i=0; while [ $i -lt 40 ]; do head -c 4096 /dev/zero | tr '\\0' x >&2; echo \" line $i\" >&2; i=$((i+1)); done",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let tail = StderrTail::drain(child.stderr.take());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        let status = loop {
            if let Some(status) = child.try_wait().unwrap() {
                break status;
            }
            assert!(std::time::Instant::now() < deadline, "tool stalled on stderr");
            std::thread::sleep(std::time::Duration::from_millis(20));
        };
        assert!(status.success());

        let text = tail.finish();
        assert_eq!(text.lines().count(), STDERR_TAIL_LINES);
        assert!(text.ends_with(" line 39"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_is_classified_from_stderr() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let tool = temp_dir.path().join("fake-rpicam");
        std::fs::write(&tool, "#!/bin/sh\necho 'ERROR: *** no cameras available ***' >&2\nexit 1\n").unwrap();
        let mut perms = std::fs::metadata(&tool).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&tool, perms).unwrap();

        let mut source = LibcameraSource::new(
            320,
            240,
            90,
            Duration::from_millis(100),
            temp_dir.path().join("frame.jpg"),
        );
        source.program = tool.display().to_string();

        assert_eq!(source.open().await.err(), Some(CameraError::DeviceNotFound));
    }
}
