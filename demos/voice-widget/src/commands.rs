use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;

use voice_session_core::{
    AgentSession, AgentSessionTransport, CredentialClient, DeviceAudioSource, IngestServer, RadialMeter, Recorder,
    SessionConfig, SocketTransport, Transport, VoiceWidget, WsRealtimeConnector,
};
use voice_session_cpal::{devices, CpalMicrophone, CpalSpeaker};

use crate::console::{self, ConsoleObserver};

pub fn list_devices() -> Result<()> {
    println!("Input devices:");
    for source in devices::list_input_devices()? {
        let marker = if source.is_default { " (default)" } else { "" };
        println!("  {}{}", source.name, marker);
    }
    println!("Output devices:");
    for name in devices::list_output_devices()? {
        println!("  {}", name);
    }
    Ok(())
}

pub struct RecordOptions {
    pub seconds: f64,
    pub stream: bool,
    pub meter: bool,
    pub device: Option<String>,
    pub json: bool,
}

/// Record once, optionally streaming chunks to the backend socket.
pub async fn record(config: &SessionConfig, options: RecordOptions) -> Result<()> {
    let device = Arc::new(DeviceAudioSource::new(CpalMicrophone::with_device(options.device)));
    if !device.is_available() {
        bail!("no input device available");
    }

    let transport = options
        .stream
        .then(|| Arc::new(SocketTransport::from_config(config)) as Arc<dyn Transport>);
    let recorder = Recorder::from_config(Arc::clone(&device), config, transport);
    let widget = VoiceWidget::from_config(device, recorder, config)
        .with_observer(Arc::new(ConsoleObserver::new(options.json)));
    widget.watch_connection();

    widget.start_recording().await.context("failed to start recording")?;

    let meter_task = if options.meter {
        let visualizer = widget.visualizer(config.analyser_window, config.feed_fps)?;
        let meter = RadialMeter::default();
        let handle = visualizer.spawn(move |frame| console::draw_meter(&meter, frame));
        Some((visualizer, handle))
    } else {
        None
    };

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(options.seconds)) => {}
        _ = tokio::signal::ctrl_c() => log::info!("interrupted"),
    }
    drop(meter_task);
    if options.meter {
        println!();
    }

    let diagnostics = widget.recorder().diagnostics();
    let asset = widget.stop_recording().await?;
    log::info!(
        "{} chunks, {} bytes; sends delivered {}, skipped {}, failed {}",
        diagnostics.chunks_emitted,
        diagnostics.bytes_emitted,
        diagnostics.sends_delivered,
        diagnostics.sends_skipped,
        diagnostics.sends_failed
    );
    widget.shutdown().await;

    if asset.is_none() {
        bail!("nothing usable was captured");
    }
    Ok(())
}

pub struct ConverseOptions {
    pub turns: u32,
    pub seconds: f64,
    pub reply_wait: f64,
    pub device: Option<String>,
    pub json: bool,
}

/// Talk to the remote agent: record a turn, stream it, play the replies.
pub async fn converse(config: &SessionConfig, options: ConverseOptions) -> Result<()> {
    let device = Arc::new(DeviceAudioSource::new(CpalMicrophone::with_device(options.device)));
    let connector = Arc::new(WsRealtimeConnector::from_config(config));
    let agent = Arc::new(AgentSession::from_config(connector, config));
    let credentials = CredentialClient::from_config(config)?;
    let transport: Arc<dyn Transport> = Arc::new(AgentSessionTransport::with_credentials(
        Arc::clone(&agent),
        credentials,
        config.model.clone(),
    ));

    // Connect up front so chunk 0, which carries the WAV header, is delivered.
    if let Err(e) = transport.connect().await {
        log::warn!("agent connect failed, first turn stays local: {}", e);
    }

    let recorder = Recorder::from_config(Arc::clone(&device), config, Some(Arc::clone(&transport)));
    let widget = VoiceWidget::from_config(device, recorder, config)
        .with_agent(Arc::clone(&agent))
        .with_sink(Arc::new(CpalSpeaker::new()))
        .with_observer(Arc::new(ConsoleObserver::new(options.json)));
    widget.watch_connection();

    for turn in 1..=options.turns {
        println!("turn {}/{}: speak now", turn, options.turns);
        if let Err(e) = widget.start_recording().await {
            widget.shutdown().await;
            return Err(e).context("failed to start recording");
        }
        tokio::time::sleep(Duration::from_secs_f64(options.seconds)).await;
        widget.stop_recording().await?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(options.reply_wait);
        while agent.replies().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        // Let a reply that is still arriving finish before playing.
        while agent.is_agent_speaking() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let mut played = 0;
        while widget.play_next_reply().await? {
            played += 1;
        }
        if played == 0 {
            log::warn!("no reply within {:.1}s", options.reply_wait);
        }
    }

    widget.shutdown().await;
    Ok(())
}

/// Run the ingest endpoint until interrupted.
pub async fn serve(addr: &str, directory: PathBuf) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = IngestServer::bind(addr, &directory).await?.with_reports(tx);
    println!("listening on ws://{}{}", server.local_addr()?, voice_session_core::transport::ingest::INGEST_PATH);

    let reporter = tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            if report.kept {
                println!("saved {} ({} bytes)", report.file_path.display(), report.bytes_written);
            } else {
                println!("discarded failed upload after {} bytes", report.bytes_written);
            }
        }
    });

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => log::info!("shutting down"),
    }
    reporter.abort();
    Ok(())
}
