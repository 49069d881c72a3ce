//! Remote Camera Client
//!
//! Snapshots are fetched in two phases: the device first reports the
//! encoded image length, then streams exactly that many bytes after a
//! read call. Frames on the wire are bounded, so the length has to be
//! known before the bulk transfer can be sized and validated.

use crate::{CameraConfig, CameraError, Frame, FrameSource};
use rpc_protocol::protocol::decode_length;
use rpc_protocol::RpcTransport;
use std::future::Future;
use tracing::{debug, info};

/// Capture a JPEG and reply with its encoded length
pub const SNAPSHOT_METHOD: &str = "jpeg_image_snapshot";
/// Stream the captured JPEG
pub const READ_METHOD: &str = "jpeg_image_read";

/// Camera device reached through an RPC transport
pub struct RemoteCamera<T> {
    transport: T,
    config: CameraConfig,
    sequence: u32,
}

impl<T: RpcTransport> RemoteCamera<T> {
    pub fn new(transport: T, config: CameraConfig) -> Self {
        info!(
            "Remote camera ready (call timeout {}ms, transfer timeout {}ms)",
            config.call_timeout_ms, config.transfer_timeout_ms
        );
        Self {
            transport,
            config,
            sequence: 0,
        }
    }

    /// Fetch and decode one snapshot
    pub async fn fetch_snapshot(&mut self) -> Result<Frame, CameraError> {
        let reply = self
            .transport
            .call(SNAPSHOT_METHOD, &[], self.config.call_timeout())
            .await?;
        if reply.is_empty() {
            return Err(CameraError::NoImageAvailable);
        }

        let size = decode_length(&reply)? as usize;
        if size == 0 {
            return Err(CameraError::NoImageAvailable);
        }
        if size > self.config.max_image_bytes {
            return Err(CameraError::ImageTooLarge {
                size,
                limit: self.config.max_image_bytes,
            });
        }

        self.transport
            .call(READ_METHOD, &[], self.config.call_timeout())
            .await?;
        let mut buf = vec![0u8; size];
        self.transport
            .get_bytes(&mut buf, self.config.transfer_timeout())
            .await?;

        self.sequence = self.sequence.wrapping_add(1);
        let frame = Frame::decode_jpeg(&buf, self.sequence, now_ms())?;
        debug!(
            "Snapshot {}: {} bytes, {}x{}",
            frame.sequence,
            size,
            frame.width(),
            frame.height()
        );
        Ok(frame)
    }

    /// Whether the underlying link is still usable
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Give back the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Close the underlying link
    pub async fn close(self) {
        debug!("Closing remote camera after {} snapshots", self.sequence);
        self.into_transport().close().await;
    }
}

impl<T: RpcTransport> FrameSource for RemoteCamera<T> {
    fn fetch_snapshot(&mut self) -> impl Future<Output = Result<Frame, CameraError>> + Send {
        RemoteCamera::fetch_snapshot(self)
    }

    fn close(self) -> impl Future<Output = ()> + Send {
        RemoteCamera::close(self)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rpc_protocol::RpcError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Transport that replays canned device behaviour
    #[derive(Default)]
    struct ScriptedTransport {
        size_reply: Vec<u8>,
        stream: Vec<u8>,
        link_down: bool,
        calls: Vec<String>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn announcing(size: u32, stream: Vec<u8>) -> Self {
            Self {
                size_reply: size.to_le_bytes().to_vec(),
                stream,
                ..Default::default()
            }
        }
    }

    impl RpcTransport for ScriptedTransport {
        async fn call(
            &mut self,
            method: &str,
            _payload: &[u8],
            _timeout: Duration,
        ) -> Result<Vec<u8>, RpcError> {
            self.calls.push(method.to_string());
            if self.link_down {
                return Err(RpcError::Link("device unplugged".into()));
            }
            match method {
                SNAPSHOT_METHOD => Ok(self.size_reply.clone()),
                _ => Ok(Vec::new()),
            }
        }

        async fn get_bytes(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), RpcError> {
            let available = self.stream.len().min(buf.len());
            buf[..available].copy_from_slice(&self.stream[..available]);
            if available < buf.len() {
                return Err(RpcError::ShortRead {
                    expected: buf.len(),
                    received: available,
                });
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.link_down
        }

        async fn close(self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([90, 120, 150]));
        Frame::new(image, 0, 0).encode_jpeg(85).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_snapshot() {
        let data = jpeg(40, 30);
        let transport = ScriptedTransport::announcing(data.len() as u32, data);
        let mut camera = RemoteCamera::new(transport, CameraConfig::default());

        let frame = camera.fetch_snapshot().await.unwrap();
        assert_eq!((frame.width(), frame.height()), (40, 30));
        assert_eq!(frame.sequence, 1);

        let frame = camera.fetch_snapshot().await.unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(
            camera.into_transport().calls,
            vec![SNAPSHOT_METHOD, READ_METHOD, SNAPSHOT_METHOD, READ_METHOD]
        );
    }

    #[tokio::test]
    async fn test_close_releases_transport() {
        let transport = ScriptedTransport::default();
        let closed = transport.closed.clone();
        let camera = RemoteCamera::new(transport, CameraConfig::default());

        FrameSource::close(camera).await;
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_zero_size_means_no_image() {
        let transport = ScriptedTransport::announcing(0, Vec::new());
        let mut camera = RemoteCamera::new(transport, CameraConfig::default());

        let err = camera.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, CameraError::NoImageAvailable));
        assert_eq!(camera.into_transport().calls, vec![SNAPSHOT_METHOD]);
    }

    #[tokio::test]
    async fn test_empty_reply_means_no_image() {
        let transport = ScriptedTransport::default();
        let mut camera = RemoteCamera::new(transport, CameraConfig::default());

        let err = camera.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, CameraError::NoImageAvailable));
        assert_eq!(camera.into_transport().calls, vec![SNAPSHOT_METHOD]);
    }

    #[tokio::test]
    async fn test_malformed_size_is_protocol_error() {
        let transport = ScriptedTransport {
            size_reply: vec![0x10, 0x27],
            ..Default::default()
        };
        let mut camera = RemoteCamera::new(transport, CameraConfig::default());

        let err = camera.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, CameraError::Rpc(RpcError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_stream_never_yields_frame() {
        let data = jpeg(40, 30);
        let announced = data.len() as u32;
        let truncated = data[..data.len() / 2].to_vec();
        let transport = ScriptedTransport::announcing(announced, truncated);
        let mut camera = RemoteCamera::new(transport, CameraConfig::default());

        let err = camera.fetch_snapshot().await.unwrap_err();
        assert!(matches!(
            err,
            CameraError::Rpc(RpcError::ShortRead { .. })
        ));
        assert!(!err.is_link_loss());
    }

    #[tokio::test]
    async fn test_oversized_announcement_rejected() {
        let transport = ScriptedTransport::announcing(10_000, Vec::new());
        let config = CameraConfig {
            max_image_bytes: 4096,
            ..Default::default()
        };
        let mut camera = RemoteCamera::new(transport, config);

        let err = camera.fetch_snapshot().await.unwrap_err();
        assert!(matches!(
            err,
            CameraError::ImageTooLarge {
                size: 10_000,
                limit: 4096
            }
        ));
        assert_eq!(camera.into_transport().calls, vec![SNAPSHOT_METHOD]);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_decode_error() {
        let transport = ScriptedTransport::announcing(64, vec![0x42; 64]);
        let mut camera = RemoteCamera::new(transport, CameraConfig::default());

        let err = camera.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, CameraError::Decode(_)));
    }

    #[tokio::test]
    async fn test_link_loss_propagates() {
        let transport = ScriptedTransport {
            link_down: true,
            ..Default::default()
        };
        let mut camera = RemoteCamera::new(transport, CameraConfig::default());

        let err = camera.fetch_snapshot().await.unwrap_err();
        assert!(err.is_link_loss());
        assert!(!camera.is_connected());
    }
}
