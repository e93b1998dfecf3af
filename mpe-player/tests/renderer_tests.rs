//! Renderer core behaviour driven message by message against a hand-set clock

use mpe_player::config::PlaybackTuning;
use mpe_player::playback::clock::{ManualTime, MediaClock, MonotonicTime, SharedTimeSource};
use mpe_player::playback::controller::ControllerMessage;
use mpe_player::playback::renderer::{
    RendererConfig, RendererCore, RendererHandle, RendererMessage, RendererNotification, RendererNotifier,
    RendererShared, SyncState,
};
use mpe_player::playback::sink::{AudioSink, SimulatedAudioSink};
use mpe_player::playback::types::{
    AudioTearDownReason, Disposition, FinalResult, MediaBuffer, MediaFormat, PlaybackSettings, ReleaseHandle,
    StreamKind, SyncSettings, SyncSource,
};
use mpe_player::Error;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type ReleaseLog = Arc<Mutex<Vec<(i64, Disposition)>>>;

struct Harness {
    time: Arc<ManualTime>,
    clock: Arc<MediaClock>,
    shared: Arc<RendererShared>,
    core: RendererCore,
    rx: mpsc::UnboundedReceiver<ControllerMessage>,
    released: ReleaseLog,
}

impl Harness {
    fn new(sync_on_start: bool, sink: Option<Arc<dyn AudioSink>>, time: Arc<ManualTime>) -> Self {
        let time_source: SharedTimeSource = time.clone();
        let clock = Arc::new(MediaClock::new(time_source));
        let shared = Arc::new(RendererShared::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let config = RendererConfig {
            tuning: PlaybackTuning::default(),
            real_time: false,
            sync_on_start,
            playback_settings: PlaybackSettings::default(),
        };
        let core = RendererCore::new(config, shared.clone(), clock.clone(), sink, RendererNotifier::new(tx, 1));
        Self {
            time,
            clock,
            shared,
            core,
            rx,
            released: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn without_sink(sync_on_start: bool) -> Self {
        Self::new(sync_on_start, None, Arc::new(ManualTime::new(1_000_000)))
    }

    fn queue(&mut self, stream: StreamKind, pts_us: i64, len: usize) {
        let generation = self.shared.queue_generation(stream);
        self.queue_with_generation(stream, generation, pts_us, len);
    }

    fn queue_with_generation(&mut self, stream: StreamKind, generation: u64, pts_us: i64, len: usize) {
        let log = self.released.clone();
        let release = ReleaseHandle::new(move |disposition| log.lock().push((pts_us, disposition)));
        self.core.handle(RendererMessage::QueueBuffer {
            stream,
            generation,
            buffer: MediaBuffer::new(pts_us, vec![0u8; len]),
            release,
        });
    }

    fn queue_eos(&mut self, stream: StreamKind) {
        self.core.handle(RendererMessage::QueueEos {
            stream,
            generation: self.shared.queue_generation(stream),
            result: FinalResult::EndOfStream,
        });
    }

    fn released(&self) -> Vec<(i64, Disposition)> {
        self.released.lock().clone()
    }

    fn notifications(&mut self) -> Vec<RendererNotification> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            if let ControllerMessage::Renderer { notification, .. } = message {
                out.push(notification);
            }
        }
        out
    }

    fn scheduled_audio_drains(&mut self) -> Vec<u64> {
        self.core
            .take_scheduled()
            .into_iter()
            .filter_map(|scheduled| match scheduled.message {
                RendererMessage::DrainAudio { generation } => Some(generation),
                _ => None,
            })
            .collect()
    }

    /// Delayed end-of-stream notifications waiting in the outbox
    fn scheduled_audio_eos(&mut self) -> Vec<(Duration, RendererMessage)> {
        self.core
            .take_scheduled()
            .into_iter()
            .filter(|scheduled| matches!(scheduled.message, RendererMessage::NotifyAudioEos { .. }))
            .map(|scheduled| (scheduled.delay, scheduled.message))
            .collect()
    }

    fn drain_video(&mut self) {
        let generation = self.shared.drain_generation(StreamKind::Video);
        self.core.handle(RendererMessage::DrainVideo { generation });
    }

    fn drain_audio(&mut self) {
        let generation = self.shared.drain_generation(StreamKind::Audio);
        self.core.handle(RendererMessage::DrainAudio { generation });
    }

    fn open_sink(&mut self, offload: bool) -> bool {
        let (reply, mut rx) = oneshot::channel();
        self.core.handle(RendererMessage::OpenAudioSink {
            format: MediaFormat::audio("audio/raw", 48_000, 2),
            offload,
            reply,
        });
        match rx.try_recv() {
            Ok(Ok(offloaded)) => offloaded,
            other => panic!("open failed: {:?}", other.map(|r| r.map_err(|e| e.to_string()))),
        }
    }
}

#[test]
fn test_sync_trims_audio_before_first_video_frame() {
    let mut h = Harness::without_sink(true);

    h.queue(StreamKind::Audio, 0, 4096);
    assert_eq!(h.core.sync_state(), SyncState::Waiting);

    h.queue(StreamKind::Video, 150_000, 16);
    assert_eq!(h.core.sync_state(), SyncState::TrimAudio { until_us: 150_000 });
    assert_eq!(h.core.queued(StreamKind::Audio), 0);
    assert_eq!(h.released(), vec![(0, Disposition::Discarded)]);

    // Audio arriving later is still trimmed until it reaches the video start
    h.queue(StreamKind::Audio, 100_000, 4096);
    assert_eq!(h.released().len(), 2);
    assert!(matches!(h.core.sync_state(), SyncState::TrimAudio { .. }));

    h.queue(StreamKind::Audio, 200_000, 4096);
    assert_eq!(h.core.sync_state(), SyncState::Off);
    assert_eq!(h.core.queued(StreamKind::Audio), 1);
    assert_eq!(h.core.queued(StreamKind::Video), 1);
    assert_eq!(
        h.released(),
        vec![(0, Disposition::Discarded), (100_000, Disposition::Discarded)]
    );
    assert_eq!(h.scheduled_audio_drains(), vec![0]);
}

#[test]
fn test_sync_small_gap_drops_nothing() {
    let mut h = Harness::without_sink(true);

    h.queue(StreamKind::Audio, 0, 4096);
    h.queue(StreamKind::Video, 50_000, 16);

    assert_eq!(h.core.sync_state(), SyncState::Off);
    assert!(h.released().is_empty());
    assert_eq!(h.core.queued(StreamKind::Audio), 1);
}

#[test]
fn test_sync_ends_when_one_stream_is_empty_at_eos() {
    let mut h = Harness::without_sink(true);

    h.queue(StreamKind::Audio, 0, 4096);
    h.queue_eos(StreamKind::Video);

    assert_eq!(h.core.sync_state(), SyncState::Off);
    assert!(h.released().is_empty());
}

#[test]
fn test_pause_posts_no_audio_drain() {
    let mut h = Harness::without_sink(false);

    h.core.handle(RendererMessage::Pause);
    assert!(h.core.is_paused());
    assert_eq!(h.shared.drain_generation(StreamKind::Audio), 1);
    assert_eq!(h.shared.drain_generation(StreamKind::Video), 1);

    h.queue(StreamKind::Audio, 0, 4096);
    assert!(h.scheduled_audio_drains().is_empty());

    // A drain posted before the pause is ignored
    h.core.handle(RendererMessage::DrainAudio { generation: 0 });
    assert_eq!(h.core.queued(StreamKind::Audio), 1);
    assert!(h.notifications().is_empty());

    h.core.handle(RendererMessage::Resume);
    assert!(!h.core.is_paused());
    assert_eq!(h.scheduled_audio_drains(), vec![1]);
}

#[test]
fn test_late_video_frame_is_dropped() {
    let mut h = Harness::without_sink(false);

    h.queue(StreamKind::Video, 0, 16);
    h.queue(StreamKind::Video, 33_000, 16);
    h.core.take_scheduled();

    h.drain_video();
    assert_eq!(
        h.released(),
        vec![(0, Disposition::Rendered { render_time_us: 1_000_000 })]
    );
    assert_eq!(
        h.notifications(),
        vec![
            RendererNotification::VideoRenderingStart,
            RendererNotification::MediaRenderingStart
        ]
    );

    h.time.advance(200_000);
    h.drain_video();
    assert_eq!(h.released()[1], (33_000, Disposition::Late));
    assert_eq!(h.core.video_late_by_us(), 167_000);
}

#[test]
fn test_flush_discards_queue_and_reports_completion() {
    let mut h = Harness::without_sink(false);

    h.queue(StreamKind::Audio, 0, 4096);
    h.queue(StreamKind::Audio, 21_333, 4096);
    let stale_generation = h.shared.queue_generation(StreamKind::Audio);

    h.shared.begin_flush(StreamKind::Audio, true);
    h.core.handle(RendererMessage::Flush {
        stream: StreamKind::Audio,
        resync: false,
    });

    assert_eq!(h.core.queued(StreamKind::Audio), 0);
    assert_eq!(h.shared.queued(StreamKind::Audio), 0);
    assert_eq!(
        h.released(),
        vec![(0, Disposition::Discarded), (21_333, Disposition::Discarded)]
    );
    assert_eq!(
        h.notifications(),
        vec![RendererNotification::FlushComplete(StreamKind::Audio)]
    );

    // A buffer queued before the flush but delivered after it
    h.queue_with_generation(StreamKind::Audio, stale_generation, 42_666, 4096);
    assert_eq!(h.core.queued(StreamKind::Audio), 0);
    assert_eq!(h.released()[2], (42_666, Disposition::Discarded));
}

#[test]
fn test_flush_without_notify_is_silent() {
    let mut h = Harness::without_sink(false);

    h.queue(StreamKind::Video, 0, 16);
    h.shared.begin_flush(StreamKind::Video, false);
    h.core.handle(RendererMessage::Flush {
        stream: StreamKind::Video,
        resync: false,
    });

    assert_eq!(h.core.queued(StreamKind::Video), 0);
    assert!(h.notifications().is_empty());
}

#[test]
fn test_flush_with_resync_waits_for_both_queues() {
    let mut h = Harness::without_sink(false);

    h.shared.begin_flush(StreamKind::Audio, false);
    h.core.handle(RendererMessage::Flush {
        stream: StreamKind::Audio,
        resync: true,
    });
    assert_eq!(h.core.sync_state(), SyncState::Waiting);
}

#[test]
fn test_eos_reaches_controller_without_audio_device() {
    let mut h = Harness::without_sink(false);

    h.queue_eos(StreamKind::Video);
    h.drain_video();

    h.queue(StreamKind::Audio, 0, 4096);
    h.queue_eos(StreamKind::Audio);
    h.drain_audio();

    assert_eq!(
        h.notifications(),
        vec![
            RendererNotification::Eos {
                stream: StreamKind::Video,
                result: FinalResult::EndOfStream
            },
            RendererNotification::Eos {
                stream: StreamKind::Audio,
                result: FinalResult::EndOfStream
            },
        ]
    );
    assert_eq!(h.released(), vec![(0, Disposition::Discarded)]);
}

#[test]
fn test_audio_drain_writes_to_device_and_anchors_clock() {
    let time = Arc::new(ManualTime::new(1_000_000));
    let sink = Arc::new(SimulatedAudioSink::new(time.clone(), 200, false));
    let mut h = Harness::new(false, Some(sink.clone()), time);

    assert!(!h.open_sink(false));
    assert!(sink.is_playing());

    // 1024 stereo 16-bit frames
    h.queue(StreamKind::Audio, 0, 4096);
    h.drain_audio();

    assert_eq!(sink.frames_written(), 1024);
    assert_eq!(h.released(), vec![(0, Disposition::Written)]);
    assert_eq!(h.clock.now_media_us(), Ok(0));

    h.time.advance(10_000);
    assert_eq!(h.clock.now_media_us(), Ok(10_000));
}

#[test]
fn test_sink_failure_tears_down_audio() {
    let time = Arc::new(ManualTime::new(1_000_000));
    let sink = Arc::new(SimulatedAudioSink::new(time.clone(), 200, false));
    let mut h = Harness::new(false, Some(sink.clone()), time);
    h.open_sink(false);

    sink.inject_failure(Some("unplugged".to_string()));
    h.queue(StreamKind::Audio, 0, 4096);
    h.drain_audio();

    let torn_down = h
        .notifications()
        .into_iter()
        .filter(|n| {
            matches!(
                n,
                RendererNotification::AudioTearDown {
                    reason: AudioTearDownReason::SinkError,
                    ..
                }
            )
        })
        .count();
    assert_eq!(torn_down, 1);
}

#[test]
fn test_offloaded_pause_times_out() {
    let time = Arc::new(ManualTime::new(1_000_000));
    let sink = Arc::new(SimulatedAudioSink::new(time.clone(), 200, true));
    let mut h = Harness::new(false, Some(sink.clone()), time);
    assert!(h.open_sink(true));

    h.core.handle(RendererMessage::Pause);
    let timeout = h
        .core
        .take_scheduled()
        .into_iter()
        .find_map(|scheduled| match scheduled.message {
            RendererMessage::OffloadPauseTimeout { generation } => Some(generation),
            _ => None,
        });
    let generation = timeout.expect("offload pause timeout scheduled");

    h.core.handle(RendererMessage::OffloadPauseTimeout { generation });
    assert!(h.notifications().iter().any(|n| matches!(
        n,
        RendererNotification::AudioTearDown {
            reason: AudioTearDownReason::OffloadPauseTimeout,
            ..
        }
    )));
}

#[test]
fn test_playback_settings_validation_and_zero_speed() {
    let mut h = Harness::without_sink(false);

    let (reply, mut rx) = oneshot::channel();
    h.core.handle(RendererMessage::SetPlaybackSettings {
        settings: PlaybackSettings { speed: -1.0, pitch: 1.0 },
        reply,
    });
    assert!(matches!(rx.try_recv(), Ok(Err(Error::BadValue(_)))));

    let (reply, mut rx) = oneshot::channel();
    h.core.handle(RendererMessage::SetPlaybackSettings {
        settings: PlaybackSettings { speed: 0.0, pitch: 1.0 },
        reply,
    });
    assert!(matches!(rx.try_recv(), Ok(Ok(()))));
    assert!(h.core.is_paused());

    // Zero speed pauses but keeps the previous speed
    let (reply, mut rx) = oneshot::channel();
    h.core.handle(RendererMessage::GetPlaybackSettings { reply });
    assert_eq!(rx.try_recv().ok().and_then(|r| r.ok()).map(|s| s.speed), Some(1.0));

    let (reply, mut rx) = oneshot::channel();
    h.core.handle(RendererMessage::SetPlaybackSettings {
        settings: PlaybackSettings { speed: 2.0, pitch: 1.0 },
        reply,
    });
    assert!(matches!(rx.try_recv(), Ok(Ok(()))));
    assert_eq!(h.clock.playback_rate(), 0.0);
}

#[test]
fn test_sync_settings_reject_non_default_source() {
    let mut h = Harness::without_sink(false);

    let (reply, mut rx) = oneshot::channel();
    h.core.handle(RendererMessage::SetSyncSettings {
        settings: SyncSettings {
            source: SyncSource::Vsync,
            tolerance: 0.0,
        },
        video_fps_hint: -1.0,
        reply,
    });
    assert!(matches!(rx.try_recv(), Ok(Err(Error::BadValue(_)))));

    let (reply, mut rx) = oneshot::channel();
    h.core.handle(RendererMessage::SetSyncSettings {
        settings: SyncSettings::default(),
        video_fps_hint: 24.0,
        reply,
    });
    assert!(matches!(rx.try_recv(), Ok(Ok(()))));

    let (reply, mut rx) = oneshot::channel();
    h.core.handle(RendererMessage::GetSyncSettings { reply });
    assert_eq!(
        rx.try_recv().ok().and_then(|r| r.ok()),
        Some((SyncSettings::default(), 24.0))
    );
}

#[test]
fn test_shutdown_releases_everything() {
    let mut h = Harness::without_sink(true);

    h.queue(StreamKind::Audio, 0, 4096);
    h.queue(StreamKind::Audio, 21_333, 4096);
    h.core.handle(RendererMessage::Shutdown);

    assert_eq!(h.core.queued(StreamKind::Audio), 0);
    assert_eq!(h.released().len(), 2);
    assert!(h
        .released()
        .iter()
        .all(|(_, disposition)| *disposition == Disposition::Discarded));
}

#[test]
fn test_paused_renderer_holds_audio_and_eos_until_resume() {
    let time = Arc::new(ManualTime::new(1_000_000));
    let sink = Arc::new(SimulatedAudioSink::new(time.clone(), 200, false));
    let mut h = Harness::new(false, Some(sink.clone()), time);
    h.open_sink(false);

    h.core.handle(RendererMessage::Pause);
    h.queue(StreamKind::Audio, 0, 4096);
    h.queue_eos(StreamKind::Audio);

    assert!(h.scheduled_audio_drains().is_empty());
    assert_eq!(sink.write_calls(), 0);
    assert_eq!(h.core.queued(StreamKind::Audio), 2);
    assert!(h.notifications().is_empty());

    h.core.handle(RendererMessage::Resume);
    assert_eq!(h.scheduled_audio_drains().len(), 1);
    h.drain_audio();

    // The buffer goes to the device before the end-of-stream is handled
    assert_eq!(sink.write_calls(), 1);
    assert_eq!(h.released(), vec![(0, Disposition::Written)]);
    assert_eq!(h.core.queued(StreamKind::Audio), 0);
    assert!(!h
        .notifications()
        .iter()
        .any(|n| matches!(n, RendererNotification::Eos { .. })));
}

#[test]
fn test_audio_eos_waits_for_device_playout() {
    let time = Arc::new(ManualTime::new(1_000_000));
    let sink = Arc::new(SimulatedAudioSink::new(time.clone(), 200, false));
    let mut h = Harness::new(false, Some(sink.clone()), time);
    h.open_sink(false);

    h.queue(StreamKind::Audio, 0, 4096);
    h.queue_eos(StreamKind::Audio);
    h.drain_audio();

    assert!(!h
        .notifications()
        .iter()
        .any(|n| matches!(n, RendererNotification::Eos { .. })));
    let mut pending = h.scheduled_audio_eos();
    assert_eq!(pending.len(), 1);
    let (delay, message) = pending.remove(0);
    // 1024 frames at 48 kHz still in the device
    assert_eq!(delay, Duration::from_micros(21_333));
    assert!(!sink.is_playing());

    h.core.handle(message);
    assert_eq!(
        h.notifications(),
        vec![RendererNotification::Eos {
            stream: StreamKind::Audio,
            result: FinalResult::EndOfStream
        }]
    );
}

#[test]
fn test_offloaded_audio_eos_waits_for_device_playout() {
    let time = Arc::new(ManualTime::new(1_000_000));
    let sink = Arc::new(SimulatedAudioSink::new(time.clone(), 200, true));
    let mut h = Harness::new(false, Some(sink.clone()), time);
    assert!(h.open_sink(true));

    h.queue(StreamKind::Audio, 0, 4096);
    h.queue_eos(StreamKind::Audio);
    h.drain_audio();

    assert!(!h
        .notifications()
        .iter()
        .any(|n| matches!(n, RendererNotification::Eos { .. })));
    let pending = h.scheduled_audio_eos();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, Duration::from_micros(21_333));
    // The offloaded device keeps playing what it holds
    assert!(sink.is_playing());
}

#[test]
fn test_audio_eos_dropped_after_flush() {
    let time = Arc::new(ManualTime::new(1_000_000));
    let sink = Arc::new(SimulatedAudioSink::new(time.clone(), 200, false));
    let mut h = Harness::new(false, Some(sink), time);
    h.open_sink(false);

    h.queue(StreamKind::Audio, 0, 4096);
    h.queue_eos(StreamKind::Audio);
    h.drain_audio();
    let (_, message) = h.scheduled_audio_eos().remove(0);

    h.shared.begin_flush(StreamKind::Audio, false);
    h.core.handle(RendererMessage::Flush {
        stream: StreamKind::Audio,
        resync: false,
    });
    h.core.handle(message);
    assert!(h.notifications().is_empty());
}

#[test]
fn test_early_video_frame_is_reevaluated() {
    let mut h = Harness::without_sink(false);

    h.queue(StreamKind::Video, 0, 16);
    h.core.take_scheduled();
    h.drain_video();

    // Two seconds ahead of the clock: check again later instead of scheduling
    h.queue(StreamKind::Video, 2_000_000, 16);
    let scheduled = h.core.take_scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].delay, Duration::from_millis(500));
    let generation = match scheduled[0].message {
        RendererMessage::PostDrainVideo { generation } => generation,
        _ => panic!("expected a deferred re-evaluation"),
    };
    assert_eq!(h.released().len(), 1);

    h.time.advance(1_800_000);
    h.core.handle(RendererMessage::PostDrainVideo { generation });
    let scheduled = h.core.take_scheduled();
    assert_eq!(scheduled.len(), 1);
    assert!(matches!(scheduled[0].message, RendererMessage::DrainVideo { .. }));
    assert!(scheduled[0].delay < Duration::from_millis(500));
}

#[test]
fn test_queue_entries_drain_in_arrival_order() {
    let mut h = Harness::without_sink(false);

    h.queue(StreamKind::Video, 0, 16);
    h.queue(StreamKind::Video, 33_000, 16);
    h.queue_eos(StreamKind::Video);
    h.core.take_scheduled();

    h.drain_video();
    h.drain_video();
    assert!(!h
        .notifications()
        .iter()
        .any(|n| matches!(n, RendererNotification::Eos { .. })));
    h.drain_video();

    assert_eq!(
        h.released(),
        vec![
            (0, Disposition::Rendered { render_time_us: 1_000_000 }),
            (33_000, Disposition::Rendered { render_time_us: 1_033_000 }),
        ]
    );
    assert_eq!(
        h.notifications().last(),
        Some(&RendererNotification::Eos {
            stream: StreamKind::Video,
            result: FinalResult::EndOfStream
        })
    );
    assert_eq!(h.core.queued(StreamKind::Video), 0);
}

#[test]
fn test_fenced_input_is_refused_until_opened() {
    let shared = RendererShared::default();
    assert_eq!(shared.input_generation(StreamKind::Video), Some(0));

    shared.fence_input(StreamKind::Video);
    shared.begin_flush(StreamKind::Video, true);
    // A decoder pull that lands between the flush and the decoder's own flush
    assert_eq!(shared.input_generation(StreamKind::Video), None);
    assert_eq!(shared.input_generation(StreamKind::Audio), Some(0));

    shared.open_input(StreamKind::Video);
    assert_eq!(shared.input_generation(StreamKind::Video), Some(1));
}

#[tokio::test]
async fn test_buffer_pulled_during_decoder_flush_never_reaches_queue() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = RendererConfig {
        tuning: PlaybackTuning::default(),
        real_time: false,
        sync_on_start: true,
        playback_settings: PlaybackSettings::default(),
    };
    let clock = Arc::new(MediaClock::new(MonotonicTime::shared()));
    let renderer = RendererHandle::spawn(config, clock, None, RendererNotifier::new(tx, 1));
    let released: ReleaseLog = Arc::new(Mutex::new(Vec::new()));
    let release = |pts_us: i64| {
        let log = released.clone();
        ReleaseHandle::new(move |disposition| log.lock().push((pts_us, disposition)))
    };

    renderer.flush_decoder_output(StreamKind::Video, true);
    // Pre-seek frame the decoder dequeued before it saw its flush
    renderer.queue_buffer(StreamKind::Video, MediaBuffer::new(2_000_000, vec![0u8; 16]), release(2_000_000));
    renderer.queue_eos(StreamKind::Video, FinalResult::EndOfStream);
    assert_eq!(released.lock().clone(), vec![(2_000_000, Disposition::Discarded)]);

    let flushed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(ControllerMessage::Renderer {
                    notification: RendererNotification::FlushComplete(stream),
                    ..
                }) => return stream,
                Some(_) => {}
                None => panic!("renderer gone"),
            }
        }
    })
    .await
    .expect("flush completion");
    assert_eq!(flushed, StreamKind::Video);
    assert_eq!(renderer.queued_buffers(StreamKind::Video), 0);

    renderer.open_input(StreamKind::Video);
    renderer.queue_buffer(StreamKind::Video, MediaBuffer::new(8_000_000, vec![0u8; 16]), release(8_000_000));
    tokio::time::timeout(Duration::from_secs(5), async {
        while renderer.queued_buffers(StreamKind::Video) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("post-flush buffer queued");
    assert_eq!(released.lock().len(), 1);
    renderer.shutdown();
}
