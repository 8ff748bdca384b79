use crate::internal::*;
use image::RgbImage;
use image::imageops::{self, FilterType};

/// Side of the square input the backbone is pinned to.
pub const INPUT_SIZE: usize = 224;
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decodes any supported image format and forces three RGB channels.
pub fn decode(bytes: &[u8]) -> TractResult<RgbImage> {
    let image = image::load_from_memory(bytes).context("Decoding image")?;
    Ok(image.to_rgb8())
}

/// Resizes to 224x224 and normalizes with the ImageNet statistics.
///
/// Output is a `[1, 3, 224, 224]` f32 tensor, whatever the input size and aspect ratio.
pub fn preprocess(image: &RgbImage) -> Tensor {
    let resized =
        imageops::resize(image, INPUT_SIZE as u32, INPUT_SIZE as u32, FilterType::Triangle);
    tract_ndarray::Array4::from_shape_fn((1, 3, INPUT_SIZE, INPUT_SIZE), |(_, c, y, x)| {
        (resized[(x as _, y as _)][c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
    })
    .into()
}
