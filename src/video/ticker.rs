//! Periodic camera frame uplink task.

use std::time::Duration;

use base64::Engine as _;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::frames::{encode_jpeg, FrameSource};
use crate::config::VideoConfig;
use crate::live::{MediaBlob, OutboundFrame};
use crate::session::{lock_status, SharedStatus};

/// Encoding parameters for the frame ticker.
#[derive(Debug, Clone, Copy)]
pub struct VideoTicker {
    pub interval: Duration,
    pub jpeg_quality: u8,
    pub max_width: u32,
}

impl VideoTicker {
    pub fn from_config(config: &VideoConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            jpeg_quality: config.jpeg_quality,
            max_width: config.max_width,
        }
    }

    /// Grab, encode and queue one frame.  Returns `false` once the outbound
    /// channel is closed.
    ///
    /// Scaling and JPEG encoding run on the blocking pool.
    async fn tick(
        &self,
        source: &mut dyn FrameSource,
        outbound: &mpsc::Sender<OutboundFrame>,
        status: &SharedStatus,
    ) -> bool {
        let frame = match source.grab() {
            Ok(Some(frame)) => frame,
            Ok(None) => return true,
            Err(e) => {
                log::warn!("video: frame grab failed: {e}");
                return true;
            }
        };

        let (quality, max_width) = (self.jpeg_quality, self.max_width);
        let encoded =
            tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality, max_width)).await;
        let jpeg = match encoded {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                log::warn!("video: jpeg encode failed: {e}");
                return true;
            }
            Err(e) => {
                log::warn!("video: encoder task failed: {e}");
                return true;
            }
        };

        let blob = MediaBlob::jpeg(base64::engine::general_purpose::STANDARD.encode(jpeg));
        match outbound.try_send(OutboundFrame::Media(blob)) {
            Ok(()) => {
                lock_status(status).frames_sent += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::debug!("video: outbound queue full, frame skipped");
                lock_status(status).frames_dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Spawn the periodic frame task.  Abort the returned handle to stop it.
pub fn spawn_video_ticker(
    ticker: VideoTicker,
    mut source: Box<dyn FrameSource>,
    outbound: mpsc::Sender<OutboundFrame>,
    status: SharedStatus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ticker.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if !ticker.tick(source.as_mut(), &outbound, &status).await {
                log::debug!("video: outbound closed, ticker stopping");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::new_shared_status;
    use crate::video::{StillFrameSource, VideoError};
    use image::RgbImage;

    struct EmptySource;

    impl FrameSource for EmptySource {
        fn grab(&mut self) -> Result<Option<RgbImage>, VideoError> {
            Ok(None)
        }
    }

    fn ticker() -> VideoTicker {
        VideoTicker {
            interval: Duration::from_millis(10),
            jpeg_quality: 60,
            max_width: 64,
        }
    }

    #[tokio::test]
    async fn tick_queues_jpeg_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let status = new_shared_status();
        let mut source = StillFrameSource::from_image(RgbImage::new(16, 16));

        assert!(ticker().tick(&mut source, &tx, &status).await);

        match rx.try_recv().unwrap() {
            OutboundFrame::Media(blob) => {
                assert_eq!(blob.mime_type, "image/jpeg");
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(blob.data)
                    .unwrap();
                assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(lock_status(&status).frames_sent, 1);
    }

    #[tokio::test]
    async fn tick_without_frame_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let status = new_shared_status();
        assert!(ticker().tick(&mut EmptySource, &tx, &status).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_frame() {
        let (tx, _rx) = mpsc::channel(1);
        let status = new_shared_status();
        let mut source = StillFrameSource::from_image(RgbImage::new(8, 8));

        assert!(ticker().tick(&mut source, &tx, &status).await);
        assert!(ticker().tick(&mut source, &tx, &status).await);
        let st = lock_status(&status);
        assert_eq!(st.frames_sent, 1);
        assert_eq!(st.frames_dropped, 1);
    }

    #[tokio::test]
    async fn closed_channel_stops_ticker() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut source = StillFrameSource::from_image(RgbImage::new(8, 8));
        assert!(!ticker().tick(&mut source, &tx, &new_shared_status()).await);
    }

    #[tokio::test]
    async fn large_frame_is_scaled_before_sending() {
        let (tx, mut rx) = mpsc::channel(4);
        let status = new_shared_status();
        let mut source = StillFrameSource::from_image(RgbImage::new(1_920, 1_080));

        assert!(ticker().tick(&mut source, &tx, &status).await);
        let OutboundFrame::Media(blob) = rx.try_recv().unwrap() else {
            panic!("expected a media frame");
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(blob.data)
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 64);
    }

    #[tokio::test]
    async fn spawned_ticker_sends_periodically_until_aborted() {
        let (tx, mut rx) = mpsc::channel(16);
        let source = Box::new(StillFrameSource::from_image(RgbImage::new(8, 8)));
        let handle = spawn_video_ticker(ticker(), source, tx, new_shared_status());

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
