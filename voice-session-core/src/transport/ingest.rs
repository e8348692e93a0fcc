use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use futures_util::{SinkExt, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::models::error::SessionError;
use crate::processing::wav_format;
use crate::storage::create_timestamped;

pub const INGEST_PATH: &str = "/ws/voice-stream-to-file";

/// One finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub file_path: PathBuf,
    pub bytes_written: u64,
    /// False when the upload failed and the file was removed.
    pub kept: bool,
}

/// Receiving end of the streaming socket.
///
/// Every connection is written verbatim to its own
/// `voice_recording_<YYYYmmdd_HHMMSS>.wav` and each frame is acknowledged
/// with `Received <n> bytes`.
pub struct IngestServer {
    listener: TcpListener,
    directory: PathBuf,
    path: String,
    reports: Option<mpsc::UnboundedSender<IngestReport>>,
}

impl IngestServer {
    pub async fn bind(addr: &str, directory: impl AsRef<Path>) -> Result<Self, SessionError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SessionError::TransportError(format!("failed to bind {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            directory: directory.as_ref().to_path_buf(),
            path: INGEST_PATH.to_string(),
            reports: None,
        })
    }

    /// Report every finished upload on `reports`.
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<IngestReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SessionError> {
        self.listener
            .local_addr()
            .map_err(|e| SessionError::TransportError(e.to_string()))
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> Result<(), SessionError> {
        log::info!("ingest listening on {:?}{}", self.listener.local_addr().ok(), self.path);
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| SessionError::TransportError(format!("accept failed: {}", e)))?;
            let directory = self.directory.clone();
            let path = self.path.clone();
            let reports = self.reports.clone();
            tokio::spawn(async move {
                if let Some(report) = handle_upload(stream, peer, &directory, &path).await {
                    if let Some(reports) = reports {
                        let _ = reports.send(report);
                    }
                }
            });
        }
    }
}

async fn handle_upload(stream: TcpStream, peer: SocketAddr, directory: &Path, path: &str) -> Option<IngestReport> {
    let expected = path.to_string();
    let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == expected {
            Ok(resp)
        } else {
            let mut reject = ErrorResponse::new(Some(format!("no such endpoint: {}", req.uri().path())));
            *reject.status_mut() = StatusCode::NOT_FOUND;
            Err(reject)
        }
    };
    let mut ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("rejected upload from {}: {}", peer, e);
            return None;
        }
    };

    let (file, file_path) = match create_timestamped(directory, "voice_recording", "wav") {
        Ok(created) => created,
        Err(e) => {
            log::error!("cannot store upload from {}: {}", peer, e);
            let _ = ws.close(None).await;
            return None;
        }
    };
    let mut file = File::from_std(file);
    log::info!("recording upload from {} to {}", peer, file_path.display());

    let mut written = 0u64;
    let outcome: Result<(), SessionError> = async {
        while let Some(message) = ws.next().await {
            match message? {
                Message::Binary(data) => {
                    file.write_all(&data).await.map_err(io_error)?;
                    file.flush().await.map_err(io_error)?;
                    written += data.len() as u64;
                    ws.send(Message::Text(format!("Received {} bytes", data.len()))).await?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        finalize_header(&mut file, written).await
    }
    .await;

    match outcome {
        Ok(()) => {
            log::info!("upload from {} saved to {} ({} bytes)", peer, file_path.display(), written);
            Some(IngestReport {
                file_path,
                bytes_written: written,
                kept: true,
            })
        }
        Err(e) => {
            log::error!("upload from {} failed: {}", peer, e);
            drop(file);
            if let Err(e) = tokio::fs::remove_file(&file_path).await {
                log::warn!("failed to remove {}: {}", file_path.display(), e);
            }
            Some(IngestReport {
                file_path,
                bytes_written: written,
                kept: false,
            })
        }
    }
}

fn io_error(e: std::io::Error) -> SessionError {
    SessionError::StorageError(e.to_string())
}

/// Replace streaming placeholder sizes with the real ones. Other content is left alone.
async fn finalize_header(file: &mut File, written: u64) -> Result<(), SessionError> {
    if written < wav_format::WAV_HEADER_SIZE as u64 {
        return Ok(());
    }
    let mut header = [0u8; wav_format::WAV_HEADER_SIZE];
    file.seek(SeekFrom::Start(0)).await.map_err(io_error)?;
    file.read_exact(&mut header).await.map_err(io_error)?;

    let Ok(parsed) = wav_format::parse_wav_header(&header) else {
        return Ok(());
    };
    if !parsed.is_streaming() {
        return Ok(());
    }
    let available = written - wav_format::WAV_HEADER_SIZE as u64;
    let data_size = available - available % parsed.block_align.max(1) as u64;
    wav_format::patch_data_size(&mut header, data_size);
    wav_format::patch_file_size(&mut header, data_size + wav_format::WAV_HEADER_SIZE as u64);

    file.seek(SeekFrom::Start(0)).await.map_err(io_error)?;
    file.write_all(&header).await.map_err(io_error)?;
    file.sync_all().await.map_err(io_error)?;
    Ok(())
}
