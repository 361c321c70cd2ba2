//! Conversions between image files and tensors.
use crate::error::{BdcnError, Result};
use image::{GrayImage, RgbImage};
use std::path::Path;
use tch::{Kind, Tensor};

fn hwc_to_chw(tensor: &Tensor) -> Tensor {
    tensor.permute([2, 0, 1])
}

fn open(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).map_err(|e| BdcnError::image_context(path, e))
}

/// `h * w * 3` => `3 * h * w`, uint8 in RGB order.
pub fn rgb_to_tensor(rgb: &RgbImage) -> Tensor {
    let size = [rgb.height() as i64, rgb.width() as i64, 3];
    hwc_to_chw(&Tensor::from_slice(rgb.as_raw()).view(size))
}

/// `h * w` => `1 * h * w`, uint8.
pub fn gray_to_tensor(gray: &GrayImage) -> Tensor {
    let size = [gray.height() as i64, gray.width() as i64, 1];
    hwc_to_chw(&Tensor::from_slice(gray.as_raw()).view(size))
}

/// Loads an image as a float tensor of shape [3, height, width] in BGR channel
/// order, with the per-channel mean subtracted.
pub fn load_bgr<T: AsRef<Path>>(path: T, mean_bgr: [f64; 3]) -> Result<Tensor> {
    let rgb = open(path.as_ref())?.to_rgb8();
    let bgr = rgb_to_tensor(&rgb).flip([0]).to_kind(Kind::Float);
    let mean = Tensor::from_slice(&mean_bgr).to_kind(Kind::Float).view([3, 1, 1]);
    Ok(bgr - mean)
}

/// Loads an image as a single channel float tensor of shape [1, height, width]
/// with values in [0, 255].
pub fn load_gray<T: AsRef<Path>>(path: T) -> Result<Tensor> {
    let gray = open(path.as_ref())?.to_luma8();
    Ok(gray_to_tensor(&gray).to_kind(Kind::Float))
}

/// Scales a probability map with values in [0, 1] to uint8.
pub fn probability_to_u8(t: &Tensor) -> Tensor {
    (t * 255.).round().clamp(0., 255.).to_kind(Kind::Uint8)
}

/// Saves a single channel tensor of shape [1, height, width] or [height, width].
///
/// The tensor is expected to be uint8. The image format is based on the filename
/// suffix.
pub fn save_gray<T: AsRef<Path>>(t: &Tensor, path: T) -> Result<()> {
    let path = path.as_ref();
    let t = match t.size().as_slice() {
        [1, _, _] => t.squeeze_dim(0),
        [_, _] => t.shallow_clone(),
        size => {
            return Err(BdcnError::Shape(format!("expected a single channel image, got {size:?}")))
        }
    };
    if t.kind() != Kind::Uint8 {
        return Err(BdcnError::Shape(format!("expected a uint8 tensor, got {:?}", t.kind())));
    }
    let (height, width) = (t.size()[0] as u32, t.size()[1] as u32);
    let buffer = Vec::<u8>::try_from(&t.contiguous().view([-1]))?;
    let gray = GrayImage::from_raw(width, height, buffer)
        .ok_or_else(|| BdcnError::Shape("failed to convert tensor to image".to_string()))?;
    gray.save(path).map_err(|e| BdcnError::image_context(path, e))
}
