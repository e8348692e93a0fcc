use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use voice_session_core::mock::{MockConnector, MockMicrophone, RecordingTransport};
use voice_session_core::models::audio_models::concat_chunks;
use voice_session_core::processing::wav_format;
use voice_session_core::{
    AgentSession, AgentSessionTransport, AgentState, ConnectionStatus, DeviceAudioSource, PcmEncoder, Recorder, SessionConfig,
    SessionError, Transport, VoiceWidget,
};

fn device(mic: &MockMicrophone) -> Arc<DeviceAudioSource> {
    Arc::new(DeviceAudioSource::new(mic.clone()))
}

#[tokio::test(start_paused = true)]
async fn three_timeslices_reach_connected_transport_in_order() {
    let mic = MockMicrophone::new(16000, 1);
    let transport = Arc::new(RecordingTransport::connected());
    let recorder = Recorder::new(
        device(&mic),
        Duration::from_millis(250),
        Some(Arc::clone(&transport) as Arc<dyn Transport>),
    );

    recorder.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    for _ in 0..3 {
        mic.emit(&[0.2; 400]);
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let sent = transport.sent();
    let local = recorder.chunks();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent, local);
    assert_eq!(sent.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![0, 1, 2]);

    let captured = recorder.stop().await.unwrap();
    assert_eq!(captured.sends_delivered, 3);
    assert_eq!(captured.bytes, concat_chunks(&local));
}

#[tokio::test(start_paused = true)]
async fn never_connected_transport_loses_nothing_locally() {
    let mic = MockMicrophone::new(16000, 1);
    let transport = Arc::new(RecordingTransport::never_connects());
    let recorder = Recorder::new(
        device(&mic),
        Duration::from_millis(100),
        Some(Arc::clone(&transport) as Arc<dyn Transport>),
    );

    recorder.start().await.unwrap();
    for i in 0..5 {
        mic.emit(&vec![0.01 * i as f32; 160]);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let local = recorder.chunks();
    let captured = recorder.stop().await.unwrap();

    assert!(transport.sent().is_empty());
    assert_eq!(transport.status(), ConnectionStatus::Error);
    assert!(captured.bytes.starts_with(&concat_chunks(&local)));
    assert_eq!(captured.bytes.len(), 44 + 5 * 160 * 4);
    assert_eq!(captured.sends_delivered, 0);
}

#[tokio::test]
async fn connect_before_initialize_leaves_session_untouched() {
    let session = AgentSession::from_config(Arc::new(MockConnector::new()), &SessionConfig::default());
    assert_eq!(session.connect("key").await, Err(SessionError::SessionNotInitialized));
    assert_eq!(session.state(), AgentState::Uninitialized);
    assert_eq!(session.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn repeated_recordings_never_hold_two_streams() {
    let mic = MockMicrophone::new(8000, 2);
    let device = device(&mic);
    let recorders: Vec<Recorder> = (0..3)
        .map(|_| Recorder::new(Arc::clone(&device), Duration::from_millis(100), None))
        .collect();

    for round in 0..4 {
        for recorder in &recorders {
            recorder.start().await.unwrap();
            mic.emit(&[0.1; 32]);
            tokio::time::sleep(Duration::from_millis(50 + round * 20)).await;
        }
    }
    for recorder in &recorders {
        recorder.stop().await;
    }

    assert_eq!(mic.max_concurrent_streams(), 1);
    assert!(!device.has_live_stream());
    assert_eq!(device.open_count(), 12);
}

#[tokio::test]
async fn replies_drain_first_in_first_out() {
    let session = AgentSession::from_config(Arc::new(MockConnector::new()), &SessionConfig::default());
    for reply in [b"R1", b"R2", b"R3"] {
        session.replies().push(reply.to_vec());
    }
    assert_eq!(session.next_reply().await, b"R1".to_vec());
    assert_eq!(session.next_reply().await, b"R2".to_vec());
    assert_eq!(session.next_reply().await, b"R3".to_vec());
    assert!(session.replies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropped_visualizer_stops_callbacks() {
    let mic = MockMicrophone::new(16000, 1);
    let dev = device(&mic);
    let recorder = Recorder::new(Arc::clone(&dev), Duration::from_millis(250), None);
    let widget = VoiceWidget::new(dev, recorder);
    widget.start_recording().await.unwrap();

    let visualizer = widget.visualizer(64, 60).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handle = visualizer.spawn(move |frame| {
        assert_eq!(frame.snapshot.len(), 32);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(handle);
    drop(visualizer);
    let frozen = calls.load(Ordering::SeqCst);
    assert!(frozen > 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), frozen);
}

#[tokio::test(start_paused = true)]
async fn recorded_bytes_encode_to_canonical_wav() {
    let mic = MockMicrophone::new(22050, 2);
    let recorder = Recorder::new(device(&mic), Duration::from_millis(100), None);

    recorder.start().await.unwrap();
    mic.emit(&[2.0, -2.0, 0.5, 0.0, -0.5, 1.0]);
    let captured = recorder.stop().await.unwrap();

    let asset = PcmEncoder::default().encode(&captured.bytes).unwrap();
    let bytes = asset.to_wav_bytes();
    assert_eq!(bytes.len(), 44 + asset.frame_count() * asset.channels() as usize * 2);
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
    assert_eq!(&bytes[36..40], b"data");

    // First channel only: 2.0, 0.5, -0.5
    assert_eq!(asset.channels(), 1);
    assert_eq!(asset.samples(), vec![32767, 16384, -16384]);

    let header = wav_format::parse_wav_header(&bytes).unwrap();
    assert_eq!(header.sample_rate, 22050);
    assert_eq!(header.bit_depth, 16);
    assert_eq!(header.frame_count(), 3);
}

#[test]
fn corrupt_capture_is_a_decode_error() {
    let err = PcmEncoder::default().encode(b"not audio at all").unwrap_err();
    assert!(matches!(err, SessionError::DecodeError(_)));
    assert!(err.is_recoverable());
}

#[tokio::test(start_paused = true)]
async fn agent_connected_before_recording_receives_the_header() {
    let mic = MockMicrophone::new(16000, 1);
    let connector = MockConnector::new();
    let agent = Arc::new(AgentSession::from_config(Arc::new(connector.clone()), &SessionConfig::default()));
    agent.initialize(SessionConfig::default().agent_descriptor()).await.unwrap();
    agent.connect("key").await.unwrap();

    let transport: Arc<dyn Transport> = Arc::new(AgentSessionTransport::new(Arc::clone(&agent)));
    transport.connect().await.unwrap();
    let recorder = Recorder::new(device(&mic), Duration::from_millis(250), Some(transport));

    recorder.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    mic.emit(&[0.2; 160]);
    tokio::time::sleep(Duration::from_millis(250)).await;
    recorder.stop().await.unwrap();

    let sent = connector.sent_audio();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][0..4], b"RIFF");
    assert_eq!(sent[0].len(), 44 + 160 * 4);
}
