use futures_util::future::BoxFuture;

use super::CaptureSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub quality: f32,
}

impl From<&CaptureSettings> for CaptureRequest {
    fn from(settings: &CaptureSettings) -> Self {
        let (width, height) = settings.resolution.dimensions();
        Self {
            width,
            height,
            quality: settings.quality,
        }
    }
}

/// Encoded image plus the size the camera actually produced, which may
/// differ from the request.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// The platform capture primitive.
pub trait Camera: Send + Sync {
    fn is_ready(&self) -> bool;

    fn capture(
        &self,
        request: CaptureRequest,
    ) -> BoxFuture<'static, Result<CapturedImage, CaptureError>>;
}
