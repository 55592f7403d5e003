//! C11: device integration (spec.md §4.11, §6).
//!
//! Wraps a [`ConnStream`] talking the same length-prefixed framing to
//! the physical display process and exposes it as a
//! `brlapi_core::driver::Driver`. Resize is detected lazily: the core
//! asks `display_size()` before every render, so a driver that changes
//! shape just needs to update the value the next call reads.
use crate::conn_stream::ConnStream;
use async_trait::async_trait;
use brlapi_core::driver::Driver;
use brlapi_core::error::{Error, ErrorCode, Result};
use brlapi_core::packet::{Packet, PacketType};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub struct ProcessDriver {
    name: String,
    model_id: String,
    display_size: AtomicUsize,
    stream: Mutex<ConnStream>,
}

impl ProcessDriver {
    pub fn new(name: impl Into<String>, model_id: impl Into<String>, display_size: usize, stream: ConnStream) -> Self {
        Self {
            name: name.into(),
            model_id: model_id.into(),
            display_size: AtomicUsize::new(display_size),
            stream: Mutex::new(stream),
        }
    }

    /// Called when the driver process reports a new display shape.
    pub fn set_display_size(&self, size: usize) {
        self.display_size.store(size, Ordering::Relaxed);
    }

    /// Dials the external driver process over a Unix-domain socket at
    /// `path` and wraps the connection as a [`Driver`].
    pub async fn connect_unix(
        path: impl AsRef<std::path::Path>,
        name: impl Into<String>,
        model_id: impl Into<String>,
        display_size: usize,
    ) -> std::io::Result<Self> {
        let socket = tokio::net::UnixStream::connect(path).await?;
        let (_pause_tx, pause_rx) = tokio::sync::watch::channel(false);
        let stream = ConnStream::new(Box::new(socket), pause_rx);
        Ok(Self::new(name, model_id, display_size, stream))
    }
}

#[async_trait]
impl Driver for ProcessDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn display_size(&self) -> usize {
        self.display_size.load(Ordering::Relaxed)
    }

    async fn read_packet(&self) -> Result<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        let packet = stream.read_packet().await?;
        Ok(packet.payload.to_vec())
    }

    async fn write_packet(&self, packet: &[u8]) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream
            .write_packet(&Packet::new(PacketType::Packet, packet.to_vec()))
            .await
    }

    async fn reset(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream
            .write_packet(&Packet::empty(PacketType::Synchronize))
            .await?;
        let reply = stream.read_packet().await?;
        if reply.ptype != PacketType::Ack {
            return Err(Error::from(ErrorCode::DriverError));
        }
        Ok(())
    }

    async fn write_window(&self, dots: &[u8]) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream
            .write_packet(&Packet::new(PacketType::Write, dots.to_vec()))
            .await
    }

    async fn read_command(&self) -> Result<Option<u64>> {
        let mut stream = self.stream.lock().await;
        let packet = stream.read_packet().await?;
        if packet.ptype != PacketType::Packet || packet.payload.len() < 8 {
            return Ok(None);
        }
        let bytes: [u8; 8] = packet.payload[..8].try_into().unwrap();
        Ok(Some(u64::from_be_bytes(bytes)))
    }
}
