use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use framecast::{Camera, CaptureError, CaptureRequest, CapturedImage};

/// Camera that renders a moving gradient and JPEG-encodes it at the
/// requested size and quality.
pub struct SyntheticCamera {
    latency: Duration,
    frames: AtomicU64,
}

impl SyntheticCamera {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            frames: AtomicU64::new(0),
        }
    }
}

impl Camera for SyntheticCamera {
    fn is_ready(&self) -> bool {
        true
    }

    fn capture(
        &self,
        request: CaptureRequest,
    ) -> BoxFuture<'static, Result<CapturedImage, CaptureError>> {
        let latency = self.latency;
        let index = self.frames.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            match tokio::task::spawn_blocking(move || render(request, index)).await {
                Ok(result) => result,
                Err(e) => Err(CaptureError::Failed(e.to_string())),
            }
        })
    }
}

fn render(request: CaptureRequest, index: u64) -> Result<CapturedImage, CaptureError> {
    let (width, height) = (request.width, request.height);
    let shift = (index % 256) as u32 * 4;
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x + shift) % 256) as u8,
            (y % 256) as u8,
            ((x + y) / 8 % 256) as u8,
        ])
    });

    let quality = (request.quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality)
        .encode_image(&image)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    Ok(CapturedImage {
        data,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_produces_jpeg_of_requested_size() {
        let camera = SyntheticCamera::new(Duration::ZERO);
        let image = camera
            .capture(CaptureRequest {
                width: 64,
                height: 48,
                quality: 0.8,
            })
            .await
            .unwrap();

        assert_eq!((image.width, image.height), (64, 48));
        assert_eq!(&image.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let request = |quality| CaptureRequest {
            width: 320,
            height: 240,
            quality,
        };
        let high = render(request(0.95), 3).unwrap();
        let low = render(request(0.2), 3).unwrap();
        assert!(low.data.len() < high.data.len());
    }
}
