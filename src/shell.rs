//! Runs the effects produced by [`AppState::update`].
//!
//! Suspending work (reading and encoding an image, opening the camera, the
//! estimation call) is spawned on the tokio runtime and reports back over an
//! unbounded channel. The owning thread drains that channel with
//! [`Shell::pump`] once per frame, so all state changes stay on one thread.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::camera::{CameraNotice, CaptureController, StreamSource, VideoStream};
use crate::encoder;
use crate::errors::CameraError;
use crate::estimation::Estimator;
use crate::session::{Acquired, AppState, Effect, Event};

enum Message {
    App(Event),
    StreamOpened {
        attempt: u64,
        result: Result<Box<dyn VideoStream>, CameraError>,
    },
}

pub struct Shell {
    runtime: Handle,
    sender: mpsc::UnboundedSender<Message>,
    receiver: mpsc::UnboundedReceiver<Message>,
    camera: CaptureController,
    source: Arc<dyn StreamSource>,
    estimator: Arc<dyn Estimator>,
}

impl Shell {
    pub fn new(
        runtime: Handle,
        camera: CaptureController,
        source: Arc<dyn StreamSource>,
        estimator: Arc<dyn Estimator>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            runtime,
            sender,
            receiver,
            camera,
            source,
            estimator,
        }
    }

    pub fn camera(&self) -> &CaptureController {
        &self.camera
    }

    /// Apply `event` and run every effect it causes, including follow-up
    /// events from effects that complete synchronously.
    pub fn dispatch(&mut self, state: &mut AppState, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in state.update(event) {
                if let Some(follow_up) = self.run(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    /// Handle everything that has completed since the last call. Never blocks.
    pub fn pump(&mut self, state: &mut AppState) {
        while let Ok(message) = self.receiver.try_recv() {
            self.handle(state, message);
        }
        if let Some(notice) = self.camera.poll() {
            self.dispatch(state, notice_event(notice));
        }
    }

    /// Wait for the next completion and handle it.
    pub async fn settle(&mut self, state: &mut AppState) -> bool {
        match self.receiver.recv().await {
            Some(message) => {
                self.handle(state, message);
                true
            }
            None => false,
        }
    }

    fn handle(&mut self, state: &mut AppState, message: Message) {
        match message {
            Message::App(event) => self.dispatch(state, event),
            Message::StreamOpened { attempt, result } => {
                if let Some(notice) = self.camera.on_stream_opened(attempt, result) {
                    self.dispatch(state, notice_event(notice));
                }
            }
        }
    }

    fn run(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Encode { generation, source } => {
                let sender = self.sender.clone();
                self.runtime.spawn(async move {
                    let result = encoder::encode(source.as_ref()).await.map(|image| {
                        let preview = image.decode_preview();
                        Acquired { image, preview }
                    });
                    let _ = sender.send(Message::App(Event::ImageEncoded { generation, result }));
                });
                None
            }

            Effect::StartCamera => match self.camera.activate() {
                Ok(Some(attempt)) => {
                    let sender = self.sender.clone();
                    let source = Arc::clone(&self.source);
                    self.runtime.spawn(async move {
                        let result = source.open().await;
                        if let Err(mpsc::error::SendError(Message::StreamOpened {
                            result: Ok(mut stream),
                            ..
                        })) = sender.send(Message::StreamOpened { attempt, result })
                        {
                            // Nobody is listening any more; release the device.
                            stream.stop();
                        }
                    });
                    None
                }
                Ok(None) => None,
                Err(e) => Some(Event::CameraFailed(e)),
            },

            Effect::StopCamera => {
                self.camera.close();
                None
            }

            Effect::CaptureFrame { generation } => {
                let result = self.camera.capture().map(|frame| Acquired {
                    image: frame.image,
                    preview: Some(frame.preview),
                });
                Some(Event::FrameCaptured { generation, result })
            }

            Effect::Estimate { generation, image } => {
                let sender = self.sender.clone();
                let estimator = Arc::clone(&self.estimator);
                self.runtime.spawn(async move {
                    let result = estimator.estimate(&image).await;
                    let _ = sender.send(Message::App(Event::EstimationFinished { generation, result }));
                });
                None
            }
        }
    }
}

fn notice_event(notice: CameraNotice) -> Event {
    match notice {
        CameraNotice::Ready => Event::CameraReady,
        CameraNotice::Failed(e) => Event::CameraFailed(e),
    }
}
