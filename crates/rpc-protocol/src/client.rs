//! RPC Client for Serial Camera Devices
//!
//! Provides async framed calls over any byte stream, normally a
//! USB virtual COM port.

use crate::error::RpcError;
use crate::protocol::{
    decode_packet, decode_result_header, encode_command_header, encode_packet,
    COMMAND_DATA_MAGIC, MAX_RESYNC_BYTES, PACKET_OVERHEAD, RESULT_DATA_MAGIC, RESULT_HEADER_LEN,
    RESULT_HEADER_MAGIC,
};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Connection state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Request/response transport used by the camera client
pub trait RpcTransport: Send {
    /// Invoke a named remote call and wait for its reply
    fn call(
        &mut self,
        method: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, RpcError>> + Send;

    /// Read exactly `buf.len()` raw bytes following a call
    fn get_bytes(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<(), RpcError>> + Send;

    /// Whether the underlying link is still usable
    fn is_connected(&self) -> bool;

    /// Release the link
    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async move { drop(self) }
    }
}

/// RPC master end of a serial link
pub struct RpcClient<S> {
    /// Byte stream to the device
    stream: S,
    /// Port name, for logging
    name: String,
    /// Link state
    state: LinkState,
    /// An abandoned exchange may still deliver bytes
    stale: bool,
    /// Quiet period that ends a drain of stale input
    drain_idle: Duration,
}

/// Default quiet period before a command follows an abandoned exchange
pub const DEFAULT_DRAIN_IDLE_MS: u64 = 100;

impl RpcClient<SerialStream> {
    /// Open a serial port and wrap it in a client
    ///
    /// # Arguments
    /// * `port` - Serial port device path (e.g. "/dev/ttyACM0" or "COM3")
    /// * `baud_rate` - Baud rate; ignored by most USB virtual COM ports
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, RpcError> {
        info!("Opening serial link on {} at {} baud", port, baud_rate);
        let stream = tokio_serial::new(port, baud_rate).open_native_async()?;
        Ok(Self::with_name(stream, port))
    }
}

impl<S> RpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open stream
    pub fn new(stream: S) -> Self {
        Self::with_name(stream, "stream")
    }

    fn with_name(stream: S, name: &str) -> Self {
        Self {
            stream,
            name: name.to_string(),
            state: LinkState::Connected,
            stale: false,
            drain_idle: Duration::from_millis(DEFAULT_DRAIN_IDLE_MS),
        }
    }

    /// Set how long the line must stay quiet before a command is sent
    /// after an abandoned exchange
    pub fn set_drain_idle(&mut self, idle: Duration) {
        self.drain_idle = idle;
    }

    /// Invoke `method` and return the result bytes
    pub async fn call(
        &mut self,
        method: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, RpcError> {
        self.ensure_connected()?;
        if self.stale {
            let drained = self.drain_stale_input(timeout).await;
            self.track(drained)?;
        }
        debug!("Calling {} ({} byte payload)", method, payload.len());

        match tokio::time::timeout(timeout, self.exchange(method, payload)).await {
            Ok(Err(RpcError::Protocol(reason))) => {
                // The rest of a bad reply may still be on the line
                self.stale = true;
                Err(RpcError::Protocol(reason))
            }
            Ok(result) => self.track(result),
            Err(_) => {
                debug!("Call {} timed out after {:?}", method, timeout);
                self.stale = true;
                Err(RpcError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Fill `buf` with raw bytes streamed after a call
    pub async fn get_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), RpcError> {
        self.ensure_connected()?;
        let expected = buf.len();

        let outcome = tokio::time::timeout(timeout, read_fully(&mut self.stream, buf)).await;
        match outcome {
            Ok(Ok(received)) if received == expected => Ok(()),
            Ok(Ok(received)) => {
                warn!(
                    "Stream on {} ended after {} of {} bytes",
                    self.name, received, expected
                );
                Err(RpcError::ShortRead { expected, received })
            }
            Ok(Err(e)) => self.track(Err(e.into())),
            Err(_) => {
                self.stale = true;
                Err(RpcError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Check if the link is usable
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Close the link, releasing the stream
    pub async fn close(mut self) {
        if self.is_connected() {
            if let Err(e) = self.stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.name, e);
            }
        }
        self.state = LinkState::Disconnected;
        info!("Closed serial link {}", self.name);
    }

    async fn exchange(&mut self, method: &str, payload: &[u8]) -> Result<Vec<u8>, RpcError> {
        let header = encode_command_header(method, payload.len())?;
        self.stream.write_all(&header).await?;
        self.stream
            .write_all(&encode_packet(COMMAND_DATA_MAGIC, payload))
            .await?;
        self.stream.flush().await?;

        let len = self.read_result_header().await?;
        let mut packet = vec![0u8; len + PACKET_OVERHEAD];
        self.stream.read_exact(&mut packet).await?;
        let body = decode_packet(RESULT_DATA_MAGIC, &packet)?;
        Ok(body.to_vec())
    }

    /// Read a result header, sliding past bytes left over from an
    /// abandoned exchange
    async fn read_result_header(&mut self) -> Result<usize, RpcError> {
        let magic = RESULT_HEADER_MAGIC.to_le_bytes();
        let mut window = [0u8; 2];
        self.stream.read_exact(&mut window).await?;

        let mut skipped = 0usize;
        while window != magic {
            if skipped >= MAX_RESYNC_BYTES {
                return Err(RpcError::Protocol(format!(
                    "no result header within {} bytes",
                    MAX_RESYNC_BYTES
                )));
            }
            window[0] = window[1];
            window[1] = self.stream.read_u8().await?;
            skipped += 1;
        }
        if skipped > 0 {
            debug!("Skipped {} stray bytes on {}", skipped, self.name);
        }

        let mut packet = [0u8; RESULT_HEADER_LEN];
        packet[..2].copy_from_slice(&window);
        self.stream.read_exact(&mut packet[2..]).await?;
        decode_result_header(&packet)
    }

    /// Discard input until the line has been quiet for `drain_idle`
    ///
    /// Replies to abandoned calls carry valid framing and cannot be told
    /// apart from a fresh reply, so they must be gone before the next
    /// command is written.
    async fn drain_stale_input(&mut self, budget: Duration) -> Result<(), RpcError> {
        let deadline = Instant::now() + budget.max(self.drain_idle);
        let mut scratch = [0u8; 512];
        let mut discarded = 0usize;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(RpcError::Protocol(format!(
                    "line on {} still busy after discarding {} stale bytes",
                    self.name, discarded
                )));
            }
            let wait = self.drain_idle.min(deadline - now);
            match tokio::time::timeout(wait, self.stream.read(&mut scratch)).await {
                Err(_) if wait == self.drain_idle => break,
                Err(_) => continue,
                Ok(Ok(0)) => {
                    return Err(RpcError::Link(format!("{} closed while draining", self.name)))
                }
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        if discarded > 0 {
            debug!("Discarded {} stale bytes on {}", discarded, self.name);
        }
        self.stale = false;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), RpcError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RpcError::Disconnected)
        }
    }

    fn track<T>(&mut self, result: Result<T, RpcError>) -> Result<T, RpcError> {
        if let Err(e) = &result {
            if e.is_link_loss() && self.is_connected() {
                warn!("Serial link {} lost: {}", self.name, e);
                self.state = LinkState::Disconnected;
            }
        }
        result
    }
}

impl<S> RpcTransport for RpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn call(
        &mut self,
        method: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, RpcError>> + Send {
        RpcClient::call(self, method, payload, timeout)
    }

    fn get_bytes(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<(), RpcError>> + Send {
        RpcClient::get_bytes(self, buf, timeout)
    }

    fn is_connected(&self) -> bool {
        RpcClient::is_connected(self)
    }

    fn close(self) -> impl Future<Output = ()> + Send {
        RpcClient::close(self)
    }
}

/// List the serial endpoints present on this machine
pub fn available_ports() -> Result<Vec<String>, RpcError> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
