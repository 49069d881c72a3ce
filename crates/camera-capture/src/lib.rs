//! Camera Capture Library for Serial Camera Devices
//!
//! Retrieves still images from a camera module attached over a serial RPC
//! link and decodes them into RGB frames.

pub mod frame;
pub mod remote;

pub use frame::Frame;
pub use remote::RemoteCamera;

use rpc_protocol::RpcError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Transport error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Device has no image available")]
    NoImageAvailable,

    #[error("Announced image size {size} exceeds limit {limit}")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("Image decode failed: {0}")]
    Decode(String),
}

impl CameraError {
    /// Whether the serial link is gone
    pub fn is_link_loss(&self) -> bool {
        matches!(self, CameraError::Rpc(e) if e.is_link_loss())
    }
}

/// Anything that can produce one frame per request
pub trait FrameSource: Send {
    /// Fetch a single snapshot
    fn fetch_snapshot(&mut self) -> impl Future<Output = Result<Frame, CameraError>> + Send;

    /// Release the source once acquisition is over
    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async move { drop(self) }
    }
}

/// Remote camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Reply deadline for each remote call
    pub call_timeout_ms: u64,
    /// Deadline for the bulk image transfer
    pub transfer_timeout_ms: u64,
    /// Largest image the device may announce
    pub max_image_bytes: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: rpc_protocol::DEFAULT_CALL_TIMEOUT_MS,
            transfer_timeout_ms: 3000,
            max_image_bytes: 1024 * 1024,
        }
    }
}

impl CameraConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}
