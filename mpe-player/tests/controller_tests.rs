//! Controller behaviour with scripted decoders
//!
//! The decoders here only record commands; each test answers for them
//! through their notifier, so flush and shutdown ordering is deterministic.

use mpe_common::events::{InfoKind, MediaErrorKind, PlaybackState, PlayerEvent};
use mpe_player::config::PlayerConfig;
use mpe_player::playback::clock::{MediaClock, MonotonicTime};
use mpe_player::playback::decoder::{
    Decoder, DecoderContext, DecoderFactory, DecoderNotification, DecoderNotifier, DecoderParameters,
};
use mpe_player::playback::flush::FlushStatus;
use mpe_player::playback::renderer::RendererHandle;
use mpe_player::playback::sink::{AudioSink, SimulatedAudioSink};
use mpe_player::playback::source::Source;
use mpe_player::playback::surface::{NullVideoSurface, SurfaceHandle};
use mpe_player::playback::synthetic::{SyntheticParams, SyntheticSource};
use mpe_player::playback::types::{
    MediaError, MediaFormat, MediaStatus, PlaybackSettings, StreamKind, SyncSettings, SyncSource, TrackType,
};
use mpe_player::playback::{ControllerOptions, PlayerController};
use mpe_player::{Error, SessionState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

struct FakeDecoder {
    stream: StreamKind,
    notifier: DecoderNotifier,
    commands: Mutex<Vec<String>>,
}

impl FakeDecoder {
    fn notify(&self, notification: DecoderNotification) {
        self.notifier.notify(notification);
    }

    fn count(&self, command: &str) -> usize {
        self.commands.lock().iter().filter(|c| c.as_str() == command).count()
    }

    fn record(&self, command: impl Into<String>) {
        self.commands.lock().push(command.into());
    }
}

impl Decoder for FakeDecoder {
    fn configure(&self, _format: &MediaFormat) -> mpe_player::Result<()> {
        self.record("configure");
        Ok(())
    }

    fn set_renderer(&self, _renderer: Option<RendererHandle>) {
        self.record("set_renderer");
    }

    fn set_parameters(&self, _params: DecoderParameters) {
        self.record("set_parameters");
    }

    fn signal_flush(&self) {
        self.record("flush");
    }

    fn signal_resume(&self, notify: bool) {
        self.record(format!("resume({})", notify));
    }

    fn initiate_shutdown(&self) {
        self.record("shutdown");
    }
}

#[derive(Default)]
struct FakeFactory {
    decoders: Mutex<Vec<Arc<FakeDecoder>>>,
    create_calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl FakeFactory {
    fn failing(times: usize) -> Self {
        let factory = Self::default();
        factory.failures_left.store(times, Ordering::SeqCst);
        factory
    }

    fn decoder(&self, stream: StreamKind) -> Option<Arc<FakeDecoder>> {
        self.decoders.lock().iter().rev().find(|d| d.stream == stream).cloned()
    }
}

impl DecoderFactory for FakeFactory {
    fn create(&self, stream: StreamKind, context: DecoderContext) -> mpe_player::Result<Arc<dyn Decoder>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Decoder("no codec available".to_string()));
        }
        let decoder = Arc::new(FakeDecoder {
            stream,
            notifier: context.notifier,
            commands: Mutex::new(Vec::new()),
        });
        self.decoders.lock().push(decoder.clone());
        Ok(decoder)
    }
}

struct Fixture {
    controller: PlayerController,
    factory: Arc<FakeFactory>,
    source: Arc<SyntheticSource>,
    events: broadcast::Receiver<PlayerEvent>,
}

impl Fixture {
    fn audio(&self) -> Arc<FakeDecoder> {
        self.factory.decoder(StreamKind::Audio).expect("audio decoder")
    }

    fn video(&self) -> Arc<FakeDecoder> {
        self.factory.decoder(StreamKind::Video).expect("video decoder")
    }

    async fn next_event(&mut self, matches: impl Fn(&PlayerEvent) -> bool) -> PlayerEvent {
        next_event(&mut self.events, matches).await
    }
}

fn params() -> SyntheticParams {
    let mut params = SyntheticParams::from_config(&PlayerConfig::default());
    params.timed_text = true;
    params
}

async fn next_event(
    events: &mut broadcast::Receiver<PlayerEvent>,
    matches: impl Fn(&PlayerEvent) -> bool,
) -> PlayerEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

async fn wait_for_flush_status(controller: &PlayerController, audio: FlushStatus, video: FlushStatus) {
    tokio::time::timeout(WAIT, async {
        loop {
            let status = controller.flush_status().await.expect("flush status");
            if status.audio == audio && status.video == video {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for flush status");
}

/// Controller with source, surface and sink attached and prepared
async fn prepared_fixture(factory: FakeFactory, synthetic: SyntheticParams) -> Fixture {
    let time = MonotonicTime::shared();
    let state = Arc::new(SessionState::new(Uuid::new_v4(), 256));
    let clock = Arc::new(MediaClock::new(time.clone()));
    let factory = Arc::new(factory);
    let controller = PlayerController::spawn(ControllerOptions::default(), state, clock, factory.clone());
    let mut events = controller.subscribe_events();

    let source = Arc::new(SyntheticSource::new(synthetic));
    controller.set_data_source(source.clone()).await.unwrap();
    let surface: SurfaceHandle = Arc::new(NullVideoSurface::new());
    controller.set_video_surface(Some(surface)).unwrap();
    let sink: Arc<dyn AudioSink> = Arc::new(SimulatedAudioSink::new(time, 200, false));
    controller.set_audio_sink(Some(sink)).unwrap();

    controller.prepare_async().unwrap();
    next_event(&mut events, |e| matches!(e, PlayerEvent::Prepared { .. })).await;

    Fixture {
        controller,
        factory,
        source,
        events,
    }
}

async fn started_fixture() -> Fixture {
    let fixture = prepared_fixture(FakeFactory::default(), params()).await;
    fixture.controller.start().unwrap();
    let factory = fixture.factory.clone();
    wait_until(move || {
        factory.decoder(StreamKind::Audio).is_some() && factory.decoder(StreamKind::Video).is_some()
    })
    .await;
    fixture
}

#[tokio::test]
async fn test_prepare_reports_duration_and_state() {
    let time = MonotonicTime::shared();
    let state = Arc::new(SessionState::new(Uuid::new_v4(), 256));
    let controller = PlayerController::spawn(
        ControllerOptions::default(),
        state,
        Arc::new(MediaClock::new(time)),
        Arc::new(FakeFactory::default()),
    );
    let mut events = controller.subscribe_events();

    // Without a data source prepare fails through the event
    controller.prepare_async().unwrap();
    match next_event(&mut events, |e| matches!(e, PlayerEvent::Prepared { .. })).await {
        PlayerEvent::Prepared { error, .. } => assert!(error.is_some()),
        other => panic!("unexpected {:?}", other),
    }

    let source = Arc::new(SyntheticSource::new(params()));
    controller.set_data_source(source.clone()).await.unwrap();
    let second: Arc<dyn Source> = Arc::new(SyntheticSource::new(params()));
    assert!(matches!(
        controller.set_data_source(second).await,
        Err(Error::InvalidState(_))
    ));

    controller.prepare_async().unwrap();
    match next_event(&mut events, |e| matches!(e, PlayerEvent::DurationChanged { .. })).await {
        PlayerEvent::DurationChanged { duration_us, .. } => assert_eq!(duration_us, 10_000_000),
        other => panic!("unexpected {:?}", other),
    }
    match next_event(&mut events, |e| matches!(e, PlayerEvent::Prepared { .. })).await {
        PlayerEvent::Prepared { error, .. } => assert!(error.is_none()),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(controller.playback_state(), PlaybackState::Prepared);
}

#[tokio::test]
async fn test_start_creates_both_decoders() {
    let f = started_fixture().await;

    assert_eq!(f.controller.playback_state(), PlaybackState::Playing);
    assert_eq!(f.audio().count("configure"), 1);
    assert_eq!(f.video().count("configure"), 1);
    assert_eq!(f.factory.create_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_back_to_back_seeks_share_one_flush() {
    let mut f = started_fixture().await;
    let (audio, video) = (f.audio(), f.video());

    f.controller.seek_to(1_000_000, true).unwrap();
    f.controller.seek_to(2_000_000, true).unwrap();
    f.controller.seek_to(3_000_000, true).unwrap();

    wait_until(|| audio.count("flush") == 1 && video.count("flush") == 1).await;
    wait_for_flush_status(&f.controller, FlushStatus::FlushingDecoder, FlushStatus::FlushingDecoder).await;

    audio.notify(DecoderNotification::FlushCompleted);
    video.notify(DecoderNotification::FlushCompleted);
    wait_until(|| video.count("resume(true)") == 1).await;

    assert_eq!(audio.count("flush"), 1);
    assert_eq!(video.count("flush"), 1);
    assert_eq!(audio.count("resume(false)"), 1);

    video.notify(DecoderNotification::ResumeCompleted);
    f.next_event(|e| matches!(e, PlayerEvent::SeekComplete { .. })).await;

    // The source landed on the last requested position
    assert!(matches!(
        f.source.dequeue_access_unit(StreamKind::Video),
        Err(MediaStatus::Discontinuity { format_change: false })
    ));
    let buffer = f.source.dequeue_access_unit(StreamKind::Video).unwrap();
    assert_eq!(buffer.pts_us, 3_000_000);
}

#[tokio::test]
async fn test_decoder_error_during_flush_defers_shutdown() {
    let mut f = started_fixture().await;
    let (audio, video) = (f.audio(), f.video());

    f.controller.seek_to(1_000_000, false).unwrap();
    wait_until(|| audio.count("flush") == 1 && video.count("flush") == 1).await;

    audio.notify(DecoderNotification::Error(MediaError::decoder("corrupt frame")));
    wait_for_flush_status(
        &f.controller,
        FlushStatus::FlushingDecoderThenShutdown,
        FlushStatus::FlushingDecoder,
    )
    .await;
    match f.next_event(|e| matches!(e, PlayerEvent::PlaybackError { .. })).await {
        PlayerEvent::PlaybackError { kind, .. } => assert_eq!(kind, MediaErrorKind::Decoder),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(audio.count("shutdown"), 0);

    // The pending flush finishes first, then the decoder is shut down
    audio.notify(DecoderNotification::FlushCompleted);
    wait_until(|| audio.count("shutdown") == 1).await;
    video.notify(DecoderNotification::FlushCompleted);
    audio.notify(DecoderNotification::ShutdownCompleted);

    wait_for_flush_status(&f.controller, FlushStatus::None, FlushStatus::None).await;
    wait_until(|| video.count("resume(false)") == 1).await;
}

#[tokio::test]
async fn test_decoder_error_while_idle_queues_shutdown() {
    let mut f = started_fixture().await;
    let audio = f.audio();

    audio.notify(DecoderNotification::Error(MediaError::decoder("bitstream error")));
    wait_until(|| audio.count("flush") == 1).await;
    wait_for_flush_status(&f.controller, FlushStatus::FlushingDecoderThenShutdown, FlushStatus::None).await;
    f.next_event(|e| matches!(e, PlayerEvent::PlaybackError { .. })).await;

    assert_eq!(f.video().count("flush"), 0);
}

#[tokio::test]
async fn test_reset_shuts_everything_down() {
    let mut f = started_fixture().await;
    let (audio, video) = (f.audio(), f.video());

    f.controller.reset().unwrap();
    wait_until(|| audio.count("flush") == 1 && video.count("flush") == 1).await;
    wait_for_flush_status(
        &f.controller,
        FlushStatus::FlushingDecoderThenShutdown,
        FlushStatus::FlushingDecoderThenShutdown,
    )
    .await;

    audio.notify(DecoderNotification::FlushCompleted);
    video.notify(DecoderNotification::FlushCompleted);
    wait_until(|| audio.count("shutdown") == 1 && video.count("shutdown") == 1).await;
    audio.notify(DecoderNotification::ShutdownCompleted);
    video.notify(DecoderNotification::ShutdownCompleted);

    f.next_event(|e| matches!(e, PlayerEvent::ResetComplete { .. })).await;
    assert_eq!(f.controller.playback_state(), PlaybackState::Idle);
    assert!(f.controller.current_position_us().is_err());

    // Reset disconnects the source so blocked reads return
    assert!(matches!(
        f.source.dequeue_access_unit(StreamKind::Audio),
        Err(MediaStatus::WouldBlock)
    ));
    assert!(matches!(
        f.controller.track_info().await,
        Ok(tracks) if tracks.is_empty()
    ));
}

#[tokio::test]
async fn test_seek_before_start_holds_paused() {
    let mut f = prepared_fixture(FakeFactory::default(), params()).await;

    f.controller.seek_to(2_000_000, true).unwrap();
    f.next_event(|e| matches!(e, PlayerEvent::SeekComplete { .. })).await;

    assert_eq!(f.controller.playback_state(), PlaybackState::Paused);
    assert!(f.source.is_paused());
    let settings = f.controller.playback_settings().await.unwrap();
    assert_eq!(settings.speed, 0.0);
}

#[tokio::test]
async fn test_scan_retries_after_decoder_creation_failure() {
    let mut f = prepared_fixture(FakeFactory::failing(1), params()).await;

    f.controller.start().unwrap();
    f.next_event(|e| matches!(e, PlayerEvent::PlaybackError { .. })).await;

    let factory = f.factory.clone();
    wait_until(move || {
        factory.decoder(StreamKind::Audio).is_some() && factory.decoder(StreamKind::Video).is_some()
    })
    .await;
    assert_eq!(f.factory.create_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_settings_requests() {
    let f = prepared_fixture(FakeFactory::default(), params()).await;

    f.controller
        .set_playback_settings(PlaybackSettings { speed: 1.5, pitch: 1.0 })
        .await
        .unwrap();
    assert_eq!(f.controller.playback_settings().await.unwrap().speed, 1.5);

    assert!(matches!(
        f.controller
            .set_playback_settings(PlaybackSettings { speed: f32::NAN, pitch: 1.0 })
            .await,
        Err(Error::BadValue(_))
    ));

    let vsync = SyncSettings {
        source: SyncSource::Vsync,
        tolerance: 0.0,
    };
    assert!(matches!(
        f.controller.set_sync_settings(vsync, -1.0).await,
        Err(Error::BadValue(_))
    ));
    f.controller
        .set_sync_settings(SyncSettings::default(), 25.0)
        .await
        .unwrap();
    assert_eq!(
        f.controller.sync_settings().await.unwrap(),
        (SyncSettings::default(), 25.0)
    );
}

#[tokio::test]
async fn test_track_selection() {
    let f = prepared_fixture(FakeFactory::default(), params()).await;

    let tracks = f.controller.track_info().await.unwrap();
    assert_eq!(tracks.len(), 3);
    assert_eq!(tracks[2].track_type, TrackType::TimedText);

    assert_eq!(f.controller.selected_track(TrackType::TimedText).await.unwrap(), None);
    f.controller.select_track(2, true, 0).await.unwrap();
    assert_eq!(f.controller.selected_track(TrackType::TimedText).await.unwrap(), Some(2));
    assert_eq!(f.controller.selected_track(TrackType::Audio).await.unwrap(), Some(0));

    assert!(matches!(
        f.controller.select_track(0, false, 0).await,
        Err(Error::InvalidTrack(_))
    ));
    assert!(matches!(
        f.controller.select_track(9, true, 0).await,
        Err(Error::InvalidTrack(_))
    ));
}

#[tokio::test]
async fn test_video_decoder_error_during_flush_defers_shutdown() {
    let mut f = started_fixture().await;
    let (audio, video) = (f.audio(), f.video());

    f.controller.seek_to(1_000_000, false).unwrap();
    wait_until(|| audio.count("flush") == 1 && video.count("flush") == 1).await;

    video.notify(DecoderNotification::Error(MediaError::decoder("corrupt frame")));
    wait_for_flush_status(
        &f.controller,
        FlushStatus::FlushingDecoder,
        FlushStatus::FlushingDecoderThenShutdown,
    )
    .await;
    match f.next_event(|e| matches!(e, PlayerEvent::PlaybackError { .. })).await {
        PlayerEvent::PlaybackError { kind, .. } => assert_eq!(kind, MediaErrorKind::Decoder),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(video.count("shutdown"), 0);

    video.notify(DecoderNotification::FlushCompleted);
    wait_until(|| video.count("shutdown") == 1).await;
    audio.notify(DecoderNotification::FlushCompleted);
    video.notify(DecoderNotification::ShutdownCompleted);

    wait_until(|| audio.count("resume(false)") == 1).await;
    assert_eq!(video.count("resume(false)"), 0);
    assert_eq!(video.count("resume(true)"), 0);
}

#[tokio::test]
async fn test_disconnected_source_keeps_scan_quiet() {
    let mut f = prepared_fixture(FakeFactory::failing(1000), params()).await;

    f.controller.start().unwrap();
    f.next_event(|e| matches!(e, PlayerEvent::PlaybackError { .. })).await;

    // First half of a reset: reads stop blocking before Reset is handled
    f.source.disconnect();
    let calls = f.factory.create_calls.load(Ordering::SeqCst);
    let factory = f.factory.clone();
    wait_until(move || factory.create_calls.load(Ordering::SeqCst) >= calls + 4).await;

    while let Ok(event) = f.events.try_recv() {
        if let PlayerEvent::PlaybackError { kind, message, .. } = event {
            assert_ne!(kind, MediaErrorKind::Source, "unexpected source error: {}", message);
        }
    }
}

#[tokio::test]
async fn test_zero_speed_pause_survives_buffering_end() {
    let mut f = started_fixture().await;

    f.controller
        .set_playback_settings(PlaybackSettings { speed: 0.0, pitch: 1.0 })
        .await
        .unwrap();
    assert_eq!(f.controller.playback_state(), PlaybackState::Paused);

    f.source.begin_stall();
    f.source.end_stall();
    f.next_event(|e| {
        matches!(
            e,
            PlayerEvent::Info {
                kind: InfoKind::BufferingEnd,
                ..
            }
        )
    })
    .await;

    assert_eq!(f.controller.playback_state(), PlaybackState::Paused);
    assert_eq!(f.controller.playback_settings().await.unwrap().speed, 0.0);
}

#[tokio::test]
async fn test_speed_change_while_buffering_waits_for_buffering_end() {
    let mut f = started_fixture().await;

    f.source.begin_stall();
    f.next_event(|e| {
        matches!(
            e,
            PlayerEvent::Info {
                kind: InfoKind::BufferingStart,
                ..
            }
        )
    })
    .await;
    assert_eq!(f.controller.playback_state(), PlaybackState::Paused);

    f.controller
        .set_playback_settings(PlaybackSettings { speed: 2.0, pitch: 1.0 })
        .await
        .unwrap();
    assert_eq!(f.controller.playback_state(), PlaybackState::Paused);

    f.source.end_stall();
    let controller = &f.controller;
    wait_until(|| controller.playback_state() == PlaybackState::Playing).await;
    assert_eq!(f.controller.playback_settings().await.unwrap().speed, 2.0);
}

#[tokio::test]
async fn test_nonzero_speed_starts_prepared_player() {
    let f = prepared_fixture(FakeFactory::default(), params()).await;

    f.controller
        .set_playback_settings(PlaybackSettings { speed: 1.0, pitch: 1.0 })
        .await
        .unwrap();

    assert_eq!(f.controller.playback_state(), PlaybackState::Playing);
    let factory = f.factory.clone();
    wait_until(move || {
        factory.decoder(StreamKind::Audio).is_some() && factory.decoder(StreamKind::Video).is_some()
    })
    .await;
}
