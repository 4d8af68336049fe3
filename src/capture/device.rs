use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// One timed slice of encoded media, in capture order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFragment {
    /// Encoded container bytes
    pub data: Vec<u8>,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
}

impl MediaFragment {
    pub fn new(data: impl Into<Vec<u8>>, timestamp_ms: u64) -> Self {
        Self {
            data: data.into(),
            timestamp_ms,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Configuration handed to the capture device
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Container and codecs the device should produce
    pub mime_type: String,
    /// How often the device emits a fragment
    pub timeslice_ms: u64,
    pub video_bits_per_second: u32,
    pub capture_video: bool,
    pub capture_audio: bool,
    /// How long `stop` waits for the device to close its stream
    pub flush_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mime_type: "video/webm;codecs=vp9,opus".to_string(),
            timeslice_ms: 1000,
            video_bits_per_second: 2_500_000,
            capture_video: true,
            capture_audio: true,
            flush_timeout: Duration::from_secs(10),
        }
    }
}

/// Camera/microphone capture backend
///
/// `acquire` asks for device permission and starts capture. The returned
/// receiver yields fragments in order and closes only after the final
/// fragment has been flushed following `stop`.
#[async_trait::async_trait]
pub trait CaptureDevice: Send {
    async fn acquire(&mut self, config: &CaptureConfig) -> Result<mpsc::Receiver<MediaFragment>, DeviceError>;

    /// Request the final flush; no fragments are produced after it
    async fn stop(&mut self) -> Result<(), DeviceError>;

    /// Release the camera and microphone
    async fn release(&mut self);

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Device adapter fed by platform capture code through a channel
///
/// Every `acquire` opens a fresh fragment channel and hands its producer half
/// to the platform side through [`FragmentSinks`], so one device serves any
/// number of consecutive sessions.
pub struct ChannelDevice {
    capacity: usize,
    sinks: mpsc::UnboundedSender<FragmentSink>,
    session: Option<ActiveSession>,
}

struct ActiveSession {
    stop_tx: watch::Sender<bool>,
    released: Arc<AtomicBool>,
}

/// Platform side of a [`ChannelDevice`]: one [`FragmentSink`] per session
pub struct FragmentSinks {
    receiver: mpsc::UnboundedReceiver<FragmentSink>,
}

/// Producer half of one capture session
pub struct FragmentSink {
    sender: mpsc::Sender<MediaFragment>,
    stop_rx: watch::Receiver<bool>,
    released: Arc<AtomicBool>,
}

impl ChannelDevice {
    pub fn new(capacity: usize) -> (Self, FragmentSinks) {
        let (sinks, receiver) = mpsc::unbounded_channel();

        (
            Self {
                capacity,
                sinks,
                session: None,
            },
            FragmentSinks { receiver },
        )
    }
}

#[async_trait::async_trait]
impl CaptureDevice for ChannelDevice {
    async fn acquire(&mut self, config: &CaptureConfig) -> Result<mpsc::Receiver<MediaFragment>, DeviceError> {
        if self.session.is_some() {
            return Err(DeviceError::Unavailable("capture channel already in use".to_string()));
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        let released = Arc::new(AtomicBool::new(false));

        let sink = FragmentSink {
            sender,
            stop_rx,
            released: Arc::clone(&released),
        };
        if self.sinks.send(sink).is_err() {
            return Err(DeviceError::Unavailable("no capture source attached".to_string()));
        }

        self.session = Some(ActiveSession { stop_tx, released });
        info!(
            "Channel capture acquired ({}, {}ms fragments)",
            config.mime_type, config.timeslice_ms
        );
        Ok(receiver)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        debug!("Requesting final fragment flush");
        if let Some(session) = &self.session {
            session.stop_tx.send_replace(true);
        }
        Ok(())
    }

    async fn release(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop_tx.send_replace(true);
            session.released.store(true, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "channel"
    }
}

impl FragmentSinks {
    /// Wait for the next session to acquire the device
    pub async fn next(&mut self) -> Option<FragmentSink> {
        self.receiver.recv().await
    }

    /// The next session's sink, if one has already been acquired
    pub fn try_next(&mut self) -> Option<FragmentSink> {
        self.receiver.try_recv().ok()
    }
}

impl FragmentSink {
    /// Deliver a fragment; `false` once the controller stopped listening
    pub async fn push(&self, fragment: MediaFragment) -> bool {
        self.sender.send(fragment).await.is_ok()
    }

    /// Resolves when the controller asks for the final flush
    pub async fn stop_requested(&mut self) {
        let _ = self.stop_rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Close the stream after the final fragment
    pub fn finish(self) {
        drop(self.sender);
    }
}
