//! Call controller: opens and tears down one live call.
//!
//! [`CallController`] owns the per-call context (device tracks, task
//! handles, the outbound sender) for exactly as long as the call lasts and
//! drives [`CallState`] in the shared status.
//!
//! # Call flow
//!
//! ```text
//! start_call
//!   └─▶ Connecting
//!         ├─ MicrophoneSource::acquire ── Err → Denied ("check microphone")
//!         ├─ SpeakerSource::open ──────── Err → Denied ("check speaker")
//!         ├─ LiveConnector::connect ───── Err → Denied (transport error)
//!         ├─ drop audio captured while connecting
//!         └─ spawn capture pump, video ticker, playback task
//!   └─▶ Open(Listening)
//!
//! end_call (hang-up, or after wait_closed reports close/error)
//!   └─▶ Closing: send Close, stop ticker + pump, stop tracks, discard playback
//!   └─▶ Idle
//! ```
//!
//! The controller holds the device tracks, which are not `Send`, so it is
//! driven from the thread that created it (`block_on` in `main`); the
//! per-call tasks it spawns are ordinary tokio tasks.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::state::{lock_status, Activity, CallState, SharedStatus};
use crate::audio::{
    spawn_capture_pump, AudioOutput, CaptureError, CapturePipeline, MediaTrack,
    MicrophoneSource, OutputError, SpeakerSource,
};
use crate::config::AppConfig;
use crate::live::{build_setup_message, LiveConnector, LiveLink, OutboundFrame, TransportError};
use crate::playback::{spawn_playback, CallSignal, PlaybackRunner, PlaybackScheduler};
use crate::video::{spawn_video_ticker, CameraSource, VideoTicker};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Reasons a call could not be started.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a call is already active")]
    AlreadyActive,

    #[error("microphone unavailable: {0}")]
    Microphone(#[from] CaptureError),

    #[error("speaker unavailable: {0}")]
    Speaker(#[from] OutputError),

    #[error("live session failed: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Short reason shown in the status line while the call is denied.
    pub fn denial_reason(&self) -> String {
        match self {
            SessionError::AlreadyActive => "call already active".into(),
            SessionError::Microphone(_) => "check microphone".into(),
            SessionError::Speaker(_) => "check speaker".into(),
            SessionError::Transport(e) => e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActiveCall
// ---------------------------------------------------------------------------

/// Everything that exists only while a call is up.
struct ActiveCall {
    outbound: mpsc::Sender<OutboundFrame>,
    tracks: Vec<Box<dyn MediaTrack>>,
    capture_task: JoinHandle<()>,
    video_task: Option<JoinHandle<()>>,
    playback_task: JoinHandle<()>,
    playback_shutdown: Option<oneshot::Sender<()>>,
    signal: Option<oneshot::Receiver<CallSignal>>,
}

// ---------------------------------------------------------------------------
// CallController
// ---------------------------------------------------------------------------

pub struct CallController {
    config: AppConfig,
    status: SharedStatus,
    connector: Arc<dyn LiveConnector>,
    microphone: Arc<dyn MicrophoneSource>,
    speaker: Arc<dyn SpeakerSource>,
    camera: Option<Arc<dyn CameraSource>>,
    call: Option<ActiveCall>,
}

impl CallController {
    pub fn new(
        config: AppConfig,
        status: SharedStatus,
        connector: Arc<dyn LiveConnector>,
        microphone: Arc<dyn MicrophoneSource>,
        speaker: Arc<dyn SpeakerSource>,
    ) -> Self {
        Self {
            config,
            status,
            connector,
            microphone,
            speaker,
            camera: None,
            call: None,
        }
    }

    /// Attach a camera.  Frames are only sent when `video.enabled` is set.
    pub fn with_camera(mut self, camera: Arc<dyn CameraSource>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn status(&self) -> &SharedStatus {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        self.call.is_some()
    }

    /// `true` while the periodic frame task is running.
    pub fn video_timer_active(&self) -> bool {
        self.call
            .as_ref()
            .and_then(|c| c.video_task.as_ref())
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Number of device tracks still streaming.
    pub fn live_tracks(&self) -> usize {
        self.call
            .as_ref()
            .map(|c| c.tracks.iter().filter(|t| t.is_live()).count())
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Acquire devices, open the live session and start streaming.
    ///
    /// On failure the status is left in [`CallState::Denied`] with a short
    /// reason and every device acquired so far is released.
    pub async fn start_call(&mut self) -> Result<(), SessionError> {
        if self.call.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        {
            let mut st = lock_status(&self.status);
            st.reset_counters();
            st.error_message = None;
            st.state = CallState::Connecting;
        }
        log::info!("call: connecting");

        let mut tracks: Vec<Box<dyn MediaTrack>> = Vec::new();
        match self.open_call(&mut tracks).await {
            Ok(call) => {
                self.call = Some(call);
                lock_status(&self.status).state = CallState::Open(Activity::Listening);
                log::info!("call: open");
                Ok(())
            }
            Err(e) => {
                for track in &mut tracks {
                    track.stop();
                }
                log::error!("call: {e}");
                let mut st = lock_status(&self.status);
                st.state = CallState::Denied;
                st.error_message = Some(e.denial_reason());
                Err(e)
            }
        }
    }

    async fn open_call(
        &self,
        tracks: &mut Vec<Box<dyn MediaTrack>>,
    ) -> Result<ActiveCall, SessionError> {
        let audio = &self.config.audio;

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        tracks.push(self.microphone.acquire(chunk_tx)?);

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let (timeline, speaker_track) = self.speaker.open(ended_tx)?;
        tracks.push(speaker_track);

        let setup = build_setup_message(&self.config.live);
        let LiveLink { outbound, inbound } = self.connector.connect(&setup).await?;

        // only audio captured after the session opens goes out
        let mut stale = 0;
        while chunk_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            log::debug!("call: discarded {stale} chunks captured while connecting");
        }

        let capture_task = spawn_capture_pump(
            CapturePipeline::from_config(audio),
            chunk_rx,
            outbound.clone(),
            self.status.clone(),
        );

        let video_task = self.start_video(&outbound);

        let output: Arc<dyn AudioOutput> = Arc::new(timeline);
        let scheduler =
            PlaybackScheduler::new(output, audio.voice_rate, audio.playback_sample_rate, 1);
        let runner = PlaybackRunner::new(scheduler, self.status.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (signal_tx, signal_rx) = oneshot::channel();
        let playback_task = spawn_playback(runner, inbound, ended_rx, shutdown_rx, signal_tx);

        Ok(ActiveCall {
            outbound,
            tracks: std::mem::take(tracks),
            capture_task,
            video_task,
            playback_task,
            playback_shutdown: Some(shutdown_tx),
            signal: Some(signal_rx),
        })
    }

    /// Best-effort: a camera that fails to open leaves the call audio-only.
    fn start_video(&self, outbound: &mpsc::Sender<OutboundFrame>) -> Option<JoinHandle<()>> {
        if !self.config.video.enabled {
            return None;
        }
        let camera = self.camera.as_ref()?;
        match camera.open() {
            Ok(source) => {
                let ticker = VideoTicker::from_config(&self.config.video);
                log::info!("video: sending a frame every {:?}", ticker.interval);
                Some(spawn_video_ticker(
                    ticker,
                    source,
                    outbound.clone(),
                    self.status.clone(),
                ))
            }
            Err(e) => {
                log::warn!("video: camera unavailable, continuing audio-only: {e}");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Wait until the remote side closes the call or reports an error.
    ///
    /// Returns `None` immediately when no call is active.  A server error is
    /// recorded in the status.  Call [`end_call`](Self::end_call) afterwards
    /// to release the devices.
    pub async fn wait_closed(&mut self) -> Option<CallSignal> {
        let call = self.call.as_mut()?;
        let result = call.signal.as_mut()?.await;
        call.signal = None;
        let signal = result.ok()?;

        match &signal {
            CallSignal::Closed(reason) => log::info!("call: remote closed ({reason:?})"),
            CallSignal::Failed(message) => {
                lock_status(&self.status).error_message = Some(message.clone());
            }
        }
        Some(signal)
    }

    /// Hang up.  Does not wait for queued frames or scheduled audio.
    /// Calling it with no active call is a no-op.
    pub async fn end_call(&mut self) {
        let Some(mut call) = self.call.take() else {
            return;
        };

        lock_status(&self.status).state = CallState::Closing;
        log::info!("call: ending");

        if call.outbound.try_send(OutboundFrame::Close).is_err() {
            log::debug!("call: close frame not queued, transport will close on drop");
        }

        if let Some(video) = call.video_task.take() {
            video.abort();
        }
        call.capture_task.abort();
        for track in &mut call.tracks {
            track.stop();
            log::debug!("call: {} stopped", track.kind());
        }

        if let Some(shutdown) = call.playback_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut call.playback_task).await {
            log::warn!("call: playback task failed: {e}");
        }

        let mut st = lock_status(&self.status);
        st.state = CallState::Idle;
        st.output_level = 0.0;
        log::info!(
            "call: ended ({} frames sent, {} dropped, {} chunks played, {} interruptions)",
            st.frames_sent,
            st.frames_dropped,
            st.chunks_played,
            st.interruptions
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use image::RgbImage;

    use super::*;
    use crate::audio::{
        decode_frame, encode_frame, AudioChunk, OutputTimeline, SampleConversion, VoiceId,
    };
    use crate::live::{ServerEvent, SetupMessage};
    use crate::session::{new_shared_status, CallStatus};
    use crate::video::{FrameSource, StillFrameSource, VideoError};

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    struct MockTrack {
        kind: &'static str,
        live: Arc<AtomicBool>,
    }

    impl MediaTrack for MockTrack {
        fn kind(&self) -> &'static str {
            self.kind
        }

        fn stop(&mut self) {
            self.live.store(false, Ordering::SeqCst);
        }

        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct MockMic {
        deny: bool,
        /// Level of a chunk delivered as soon as the stream starts.
        early_chunk: Option<f32>,
        live: Arc<AtomicBool>,
        tx: Mutex<Option<mpsc::UnboundedSender<AudioChunk>>>,
    }

    impl MicrophoneSource for MockMic {
        fn acquire(
            &self,
            tx: mpsc::UnboundedSender<AudioChunk>,
        ) -> Result<Box<dyn MediaTrack>, CaptureError> {
            if self.deny {
                return Err(CaptureError::NoDevice);
            }
            self.live.store(true, Ordering::SeqCst);
            if let Some(level) = self.early_chunk {
                tx.send(AudioChunk {
                    samples: vec![level; 160],
                    sample_rate: 16_000,
                    channels: 1,
                })
                .unwrap();
            }
            *self.tx.lock().unwrap() = Some(tx);
            Ok(Box::new(MockTrack {
                kind: "microphone",
                live: self.live.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct MockSpeaker {
        live: Arc<AtomicBool>,
        timeline: Mutex<Option<OutputTimeline>>,
    }

    impl SpeakerSource for MockSpeaker {
        fn open(
            &self,
            ended_tx: mpsc::UnboundedSender<VoiceId>,
        ) -> Result<(OutputTimeline, Box<dyn MediaTrack>), OutputError> {
            let timeline = OutputTimeline::new(24_000, 1, ended_tx);
            *self.timeline.lock().unwrap() = Some(timeline.clone());
            self.live.store(true, Ordering::SeqCst);
            Ok((
                timeline,
                Box::new(MockTrack {
                    kind: "speaker",
                    live: self.live.clone(),
                }),
            ))
        }
    }

    /// Server side of an in-memory link.
    struct ServerEnd {
        from_client: mpsc::Receiver<OutboundFrame>,
        to_client: mpsc::Sender<ServerEvent>,
    }

    #[derive(Default)]
    struct MockConnector {
        refuse: bool,
        connects: AtomicUsize,
        setup: Mutex<Option<SetupMessage>>,
        server: Mutex<Option<ServerEnd>>,
    }

    impl MockConnector {
        fn take_server(&self) -> ServerEnd {
            self.server.lock().unwrap().take().unwrap()
        }
    }

    #[async_trait]
    impl LiveConnector for MockConnector {
        async fn connect(&self, setup: &SetupMessage) -> Result<LiveLink, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(TransportError::Connect("connection refused".into()));
            }
            *self.setup.lock().unwrap() = Some(setup.clone());

            let (outbound, from_client) = mpsc::channel(64);
            let (to_client, inbound) = mpsc::channel(64);
            *self.server.lock().unwrap() = Some(ServerEnd {
                from_client,
                to_client,
            });
            Ok(LiveLink { outbound, inbound })
        }
    }

    struct StillCamera;

    impl CameraSource for StillCamera {
        fn open(&self) -> Result<Box<dyn FrameSource>, VideoError> {
            Ok(Box::new(StillFrameSource::from_image(RgbImage::new(8, 8))))
        }
    }

    struct Fixture {
        controller: CallController,
        status: SharedStatus,
        mic: Arc<MockMic>,
        speaker: Arc<MockSpeaker>,
        connector: Arc<MockConnector>,
    }

    fn fixture(mic: MockMic, connector: MockConnector, video: bool) -> Fixture {
        let mut config = AppConfig::default();
        config.audio.frame_samples = 160;
        config.video.enabled = video;
        config.video.interval_ms = 10;

        let status = new_shared_status();
        let mic = Arc::new(mic);
        let speaker = Arc::new(MockSpeaker::default());
        let connector = Arc::new(connector);

        let controller = CallController::new(
            config,
            status.clone(),
            connector.clone(),
            mic.clone(),
            speaker.clone(),
        )
        .with_camera(Arc::new(StillCamera));

        Fixture {
            controller,
            status,
            mic,
            speaker,
            connector,
        }
    }

    async fn wait_for(status: &SharedStatus, pred: impl Fn(&CallStatus) -> bool) {
        for _ in 0..200 {
            if pred(&*lock_status(status)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached: {:?}", lock_status(status));
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn start_call_opens_session_and_streams_audio() {
        let mut f = fixture(MockMic::default(), MockConnector::default(), false);

        f.controller.start_call().await.unwrap();
        assert_eq!(
            lock_status(&f.status).state,
            CallState::Open(Activity::Listening)
        );
        assert_eq!(f.controller.live_tracks(), 2);
        assert!(!f.controller.video_timer_active());

        let setup = f.connector.setup.lock().unwrap().clone().unwrap();
        assert_eq!(setup.setup.generation_config.response_modalities, vec!["AUDIO"]);

        let mut server = f.connector.take_server();
        let tx = f.mic.tx.lock().unwrap().clone().unwrap();
        tx.send(AudioChunk {
            samples: vec![0.5; 160],
            sample_rate: 16_000,
            channels: 1,
        })
        .unwrap();

        match server.from_client.recv().await.unwrap() {
            OutboundFrame::Media(blob) => assert_eq!(blob.mime_type, "audio/pcm;rate=16000"),
            other => panic!("unexpected frame {other:?}"),
        }

        f.controller.end_call().await;
    }

    #[tokio::test]
    async fn audio_captured_while_connecting_is_not_sent() {
        let mic = MockMic {
            early_chunk: Some(0.75),
            ..Default::default()
        };
        let mut f = fixture(mic, MockConnector::default(), false);
        f.controller.start_call().await.unwrap();

        let mut server = f.connector.take_server();
        let tx = f.mic.tx.lock().unwrap().clone().unwrap();
        tx.send(AudioChunk {
            samples: vec![0.25; 160],
            sample_rate: 16_000,
            channels: 1,
        })
        .unwrap();

        match server.from_client.recv().await.unwrap() {
            OutboundFrame::Media(blob) => {
                let frame = decode_frame(&blob.data, 16_000, 1).unwrap();
                assert!(frame.channel(0).iter().all(|&s| s == 0.25));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(lock_status(&f.status).frames_sent, 1);

        f.controller.end_call().await;
    }

    #[tokio::test]
    async fn denied_microphone_never_connects() {
        let mic = MockMic {
            deny: true,
            ..Default::default()
        };
        let mut f = fixture(mic, MockConnector::default(), false);

        let err = f.controller.start_call().await.unwrap_err();
        assert!(matches!(err, SessionError::Microphone(_)));
        assert!(!f.controller.is_active());
        assert_eq!(f.connector.connects.load(Ordering::SeqCst), 0);

        let st = lock_status(&f.status);
        assert_eq!(st.state, CallState::Denied);
        assert_eq!(st.status_line(), "Connection denied: check microphone");
    }

    #[tokio::test]
    async fn refused_connection_releases_devices() {
        let connector = MockConnector {
            refuse: true,
            ..Default::default()
        };
        let mut f = fixture(MockMic::default(), connector, true);

        let err = f.controller.start_call().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(!f.mic.live.load(Ordering::SeqCst));
        assert!(!f.speaker.live.load(Ordering::SeqCst));
        assert_eq!(lock_status(&f.status).state, CallState::Denied);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut f = fixture(MockMic::default(), MockConnector::default(), false);
        f.controller.start_call().await.unwrap();

        assert!(matches!(
            f.controller.start_call().await,
            Err(SessionError::AlreadyActive)
        ));
        assert!(lock_status(&f.status).state.is_open());
        f.controller.end_call().await;
    }

    #[tokio::test]
    async fn end_call_stops_tracks_and_video_timer() {
        let mut f = fixture(MockMic::default(), MockConnector::default(), true);
        f.controller.start_call().await.unwrap();
        assert!(f.controller.video_timer_active());

        let mut server = f.connector.take_server();
        // at least one camera frame goes out
        loop {
            match server.from_client.recv().await.unwrap() {
                OutboundFrame::Media(blob) if blob.mime_type == "image/jpeg" => break,
                _ => {}
            }
        }

        f.controller.end_call().await;

        assert!(!f.controller.is_active());
        assert!(!f.controller.video_timer_active());
        assert_eq!(f.controller.live_tracks(), 0);
        assert!(!f.mic.live.load(Ordering::SeqCst));
        assert!(!f.speaker.live.load(Ordering::SeqCst));
        assert_eq!(lock_status(&f.status).state, CallState::Idle);

        let mut saw_close = false;
        while let Some(frame) = server.from_client.recv().await {
            saw_close |= matches!(frame, OutboundFrame::Close);
        }
        assert!(saw_close);

        // idempotent
        f.controller.end_call().await;
        assert_eq!(lock_status(&f.status).state, CallState::Idle);
    }

    #[tokio::test]
    async fn remote_audio_drives_speaking_state() {
        let mut f = fixture(MockMic::default(), MockConnector::default(), false);
        f.controller.start_call().await.unwrap();
        let server = f.connector.take_server();

        server
            .to_client
            .send(ServerEvent::Audio {
                data: encode_frame(&vec![0.3; 2_400], SampleConversion::Wrap),
                mime_type: Some("audio/pcm;rate=24000".into()),
            })
            .await
            .unwrap();
        wait_for(&f.status, |st| st.state.is_speaking()).await;

        server.to_client.send(ServerEvent::Interrupted).await.unwrap();
        wait_for(&f.status, |st| st.interruptions == 1).await;
        let timeline = f.speaker.timeline.lock().unwrap().clone().unwrap();
        assert_eq!(timeline.voice_count(), 0);

        f.controller.end_call().await;
        assert_eq!(lock_status(&f.status).chunks_played, 1);
    }

    #[tokio::test]
    async fn remote_close_is_reported() {
        let mut f = fixture(MockMic::default(), MockConnector::default(), false);
        f.controller.start_call().await.unwrap();

        let server = f.connector.take_server();
        server
            .to_client
            .send(ServerEvent::Closed {
                reason: Some("1000 done".into()),
            })
            .await
            .unwrap();

        assert_eq!(
            f.controller.wait_closed().await,
            Some(CallSignal::Closed(Some("1000 done".into())))
        );
        f.controller.end_call().await;
        assert_eq!(lock_status(&f.status).state, CallState::Idle);
    }

    #[tokio::test]
    async fn server_error_is_recorded() {
        let mut f = fixture(MockMic::default(), MockConnector::default(), false);
        f.controller.start_call().await.unwrap();

        let server = f.connector.take_server();
        server
            .to_client
            .send(ServerEvent::Error("quota exceeded".into()))
            .await
            .unwrap();

        assert_eq!(
            f.controller.wait_closed().await,
            Some(CallSignal::Failed("quota exceeded".into()))
        );
        assert_eq!(
            lock_status(&f.status).error_message.as_deref(),
            Some("quota exceeded")
        );
        f.controller.end_call().await;
    }

    #[tokio::test]
    async fn wait_closed_without_call_returns_none() {
        let mut f = fixture(MockMic::default(), MockConnector::default(), false);
        assert_eq!(f.controller.wait_closed().await, None);
    }
}
