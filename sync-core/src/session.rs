//! Session.
//!
//! Runs the read loop on an established connection: decode header,
//! decode payload, dispatch one logical message, repeat. Sending is
//! serialized through a mutex-guarded write half so `send` never
//! interleaves with a concurrent sender, giving a connection handler
//! exclusive ownership of the socket write side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::SyncError;
use crate::wire::{decode_header, encode_header, split_rep_payload, HeaderTag};

/// One fully decoded logical message.
#[derive(Debug)]
pub enum Received {
    ReqPcb,
    ReqDif,
    Pcb(String),
    Dif(String),
    Rep { diff_json: String, hash: String },
    Dis,
}

/// A cancellation handle that causes the read loop to exit after the
/// next decoded message.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owns a TCP connection: a read half for the decode loop and a
/// mutex-guarded write half for atomic `send` calls.
pub struct Session {
    header_len: usize,
    reader: Mutex<ReadHalf<TcpStream>>,
    writer: Mutex<WriteHalf<TcpStream>>,
    cancel: CancelHandle,
}

impl Session {
    pub fn new(stream: TcpStream, header_len: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            header_len,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            cancel: CancelHandle::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Build and write a header+payload pair atomically; no interleaving
    /// with a concurrent `send` call on the same session.
    pub async fn send(&self, tag: HeaderTag, payload: &str) -> Result<(), SyncError> {
        let header = encode_header(tag, payload.len(), self.header_len)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&header).await?;
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn send_dis(&self) -> Result<(), SyncError> {
        self.send(HeaderTag::Dis, "").await
    }

    /// Decode and return the next logical message, or `None` once the
    /// peer closes the connection cleanly before a header arrives.
    pub async fn recv_one(&self) -> Result<Option<Received>, SyncError> {
        let mut reader = self.reader.lock().await;

        let mut header_buf = vec![0u8; self.header_len];
        match reader.read_exact(&mut header_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(SyncError::Io(e)),
        }
        let (tag, len) = decode_header(&header_buf)?;

        let mut payload_buf = vec![0u8; len];
        reader.read_exact(&mut payload_buf).await?;
        let payload = String::from_utf8(payload_buf)
            .map_err(|e| SyncError::BadFrame(format!("payload is not valid UTF-8: {e}")))?;

        let message = match tag {
            HeaderTag::ReqPcb => Received::ReqPcb,
            HeaderTag::ReqDif => Received::ReqDif,
            HeaderTag::Pcb => Received::Pcb(payload),
            HeaderTag::Dif => Received::Dif(payload),
            HeaderTag::Rep => {
                let (diff_json, hash) = split_rep_payload(&payload)?;
                Received::Rep {
                    diff_json: diff_json.to_string(),
                    hash: hash.to_string(),
                }
            }
            HeaderTag::Dis => Received::Dis,
        };
        Ok(Some(message))
    }

    /// Run the read loop, invoking `on_message` for each decoded message.
    /// Exits on `!DIS`, on cancellation (after the current decode), on a
    /// clean peer close, or on the first fatal `SyncError`.
    pub async fn run<F, Fut>(&self, mut on_message: F) -> Result<(), SyncError>
    where
        F: FnMut(Received) -> Fut,
        Fut: std::future::Future<Output = Result<(), SyncError>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                self.send_dis().await.ok();
                return Ok(());
            }

            let message = match self.recv_one().await {
                Ok(Some(m)) => m,
                Ok(None) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "session read failed, closing");
                    return Err(e);
                }
            };

            let is_dis = matches!(message, Received::Dis);
            on_message(message).await?;
            if is_dis {
                return Ok(());
            }

            if self.cancel.is_cancelled() {
                self.send_dis().await.ok();
                return Ok(());
            }
        }
    }
}
