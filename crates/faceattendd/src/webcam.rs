//! The webcam as an exclusively held resource.
//!
//! Opening happens synchronously (fail fast); the device then lives on a
//! dedicated OS thread that serves capture requests over a channel. The
//! device is closed when the thread exits: on [`Webcam::release`], which
//! works through any shared handle, or when the last handle is dropped.

use faceattend_hw::{Camera, CameraError, Frame, FrameSource};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};

/// Opens frame sources. Implemented for real V4L2 devices by [`V4lOpener`].
pub trait CameraOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource + Send>, CameraError>;

    /// Human-readable device name for logs and status.
    fn describe(&self) -> String;
}

/// Opens a V4L2 device by path.
pub struct V4lOpener {
    pub device: String,
}

impl CameraOpener for V4lOpener {
    fn open(&self) -> Result<Box<dyn FrameSource + Send>, CameraError> {
        let camera = Camera::open(&self.device)?;
        tracing::info!(
            device = %self.device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        Ok(Box::new(camera))
    }

    fn describe(&self) -> String {
        self.device.clone()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WebcamError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("capture thread exited")]
    ChannelClosed,
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

struct CaptureRequest {
    attempts: usize,
    reply: oneshot::Sender<Result<Frame, CameraError>>,
}

/// Handle to an open webcam.
pub struct Webcam {
    tx: Mutex<Option<mpsc::Sender<CaptureRequest>>>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    device: String,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Webcam {
    /// Open the device, discard `warmup_frames`, and start the capture thread.
    pub fn start(opener: &dyn CameraOpener, warmup_frames: usize) -> Result<Self, WebcamError> {
        let device = opener.describe();
        let mut source = opener.open()?;

        if warmup_frames > 0 {
            tracing::debug!(count = warmup_frames, "discarding warmup frames");
            for _ in 0..warmup_frames {
                let _ = source.capture();
            }
        }

        let (tx, mut rx) = mpsc::channel::<CaptureRequest>(1);
        let thread_device = device.clone();
        let thread = std::thread::Builder::new()
            .name("faceattend-webcam".into())
            .spawn(move || {
                tracing::debug!(device = %thread_device, "capture thread started");
                while let Some(req) = rx.blocking_recv() {
                    let result = faceattend_hw::capture_usable(source.as_mut(), req.attempts);
                    let _ = req.reply.send(result);
                }
                drop(source);
                tracing::info!(device = %thread_device, "camera released");
            })
            .map_err(WebcamError::Spawn)?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            device,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Capture one usable frame, trying up to `attempts` raw captures.
    pub async fn frame(&self, attempts: usize) -> Result<Frame, WebcamError> {
        let tx = lock(&self.tx).clone().ok_or(WebcamError::ChannelClosed)?;
        let (reply, reply_rx) = oneshot::channel();
        tx.send(CaptureRequest { attempts, reply })
            .await
            .map_err(|_| WebcamError::ChannelClosed)?;
        // Only the queued request may keep the thread alive past a release.
        drop(tx);
        Ok(reply_rx.await.map_err(|_| WebcamError::ChannelClosed)??)
    }

    /// Close the device and wait for the capture thread to finish.
    ///
    /// Other handles to the same webcam see [`WebcamError::ChannelClosed`]
    /// afterwards. A capture already queued is served before the thread exits.
    pub async fn release(&self) {
        lock(&self.tx).take();
        let thread = lock(&self.thread).take();
        if let Some(thread) = thread {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }
}

impl Drop for Webcam {
    fn drop(&mut self) {
        // Closing the channel ends the capture thread, which drops the device.
        self.tx
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
