//! Renderer session state fed by the inbound message path

use scenelink_wire::{ImagePipeline, InboundHandler, RenderImage, ServerMessage};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the renderer has reported back during one session
pub struct RendererState {
    id: Uuid,
    images: ImagePipeline,
    last_rendered: Mutex<Option<f32>>,
    frames_rendered: AtomicU64,
    /// f32 bits
    progress: AtomicU32,
    aborted: AtomicBool,
    finished: AtomicBool,
    disconnected: AtomicBool,
}

impl RendererState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            images: ImagePipeline::new(width, height),
            last_rendered: Mutex::new(None),
            frames_rendered: AtomicU64::new(0),
            progress: AtomicU32::new(0f32.to_bits()),
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        }
    }

    fn last_rendered_lock(&self) -> MutexGuard<'_, Option<f32>> {
        self.last_rendered.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn latest_image(&self) -> Option<RenderImage> {
        self.images.latest_image()
    }

    /// Match the image buffer to the frame size requested from the renderer
    pub fn resize(&self, width: u32, height: u32) {
        self.images.set_frame_size(width, height);
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.images.frame_size()
    }

    pub fn last_rendered_frame(&self) -> Option<f32> {
        *self.last_rendered_lock()
    }

    /// Whether the renderer reported `frame` (or a later one) as done
    pub fn is_frame_rendered(&self, frame: f32) -> bool {
        self.last_rendered_frame().is_some_and(|last| last >= frame)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Acquire))
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Forget per-run progress before a new render run
    pub fn reset(&self) {
        *self.last_rendered_lock() = None;
        self.progress.store(0f32.to_bits(), Ordering::Release);
        self.aborted.store(false, Ordering::Release);
        self.finished.store(false, Ordering::Release);
    }
}

impl InboundHandler for RendererState {
    fn on_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Image(image) => {
                self.images.on_image(&image);
            }
            ServerMessage::FrameRendered(frame) => {
                debug!(frame, "Renderer finished frame");
                *self.last_rendered_lock() = Some(frame);
                self.frames_rendered.fetch_add(1, Ordering::AcqRel);
            }
            ServerMessage::Progress(progress) => {
                self.progress
                    .store(progress.clamp(0.0, 1.0).to_bits(), Ordering::Release);
            }
            ServerMessage::RenderFinished => {
                info!(session = %self.id, "Renderer finished");
                self.finished.store(true, Ordering::Release);
            }
            ServerMessage::Aborted => {
                warn!(session = %self.id, "Renderer aborted");
                self.aborted.store(true, Ordering::Release);
            }
        }
    }

    fn on_disconnect(&self) {
        debug!(session = %self.id, "Renderer receive path closed");
        self.disconnected.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenelink_wire::codec::{read_frame, write_frame};
    use scenelink_wire::{Encoder, ImageMessage, Transport};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_status_messages() {
        let state = RendererState::new(2, 2);
        assert!(!state.is_frame_rendered(1.0));

        state.on_message(ServerMessage::Progress(0.5));
        assert_eq!(state.progress(), 0.5);
        state.on_message(ServerMessage::Progress(3.0));
        assert_eq!(state.progress(), 1.0);

        state.on_message(ServerMessage::FrameRendered(1.0));
        assert!(state.is_frame_rendered(1.0));
        assert!(!state.is_frame_rendered(2.0));
        assert_eq!(state.frames_rendered(), 1);

        state.on_message(ServerMessage::RenderFinished);
        state.on_message(ServerMessage::Aborted);
        assert!(state.is_finished());
        assert!(state.is_aborted());

        state.reset();
        assert!(state.last_rendered_frame().is_none());
        assert!(!state.is_aborted());
        assert_eq!(state.progress(), 0.0);
    }

    #[test]
    fn test_images_and_disconnect() {
        let state = RendererState::new(1, 1);
        state.on_message(ServerMessage::Image(ImageMessage::rgba_real(1, 1, &[0.5; 4])));
        assert_eq!(state.latest_image().unwrap().pixel(0, 0), Some([0.5; 4]));

        state.resize(2, 1);
        assert_eq!(state.frame_size(), (2, 1));
        assert!(state.latest_image().is_none());

        assert!(!state.is_disconnected());
        state.on_disconnect();
        assert!(state.is_disconnected());
    }

    #[tokio::test]
    async fn test_state_follows_renderer_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut encoder = Encoder::new();
            let pushed = [
                ServerMessage::Image(ImageMessage::rgba_real(2, 1, &[0.0; 8])),
                ServerMessage::Image(ImageMessage::rgba_bucket(1, 0, 1, 1, &[0.25, 0.5, 0.75, 1.0])),
                ServerMessage::FrameRendered(1.0),
            ];
            for msg in &pushed {
                let frame = encoder.encode_server(msg).unwrap();
                write_frame(&mut socket, &frame).await.unwrap();
            }
            while read_frame(&mut socket).await.unwrap().is_some() {}
        });

        let state = Arc::new(RendererState::new(2, 1));
        let mut transport = Transport::with_inbound_queue(1);
        transport.connect(&addr.to_string(), state.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !state.is_frame_rendered(1.0) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let image = state.latest_image().unwrap();
        assert_eq!((image.width(), image.height()), (2, 1));
        assert_eq!(image.pixel(0, 0), Some([0.0; 4]));
        assert_eq!(image.pixel(1, 0), Some([0.25, 0.5, 0.75, 1.0]));

        transport.release().await;
        assert!(state.is_disconnected());
        server.await.unwrap();
    }
}
