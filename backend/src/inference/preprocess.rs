use image::imageops::{self, FilterType};
use ndarray::Array3;

/// Side length of the square network input.
pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;

pub const MEAN: [f32; CHANNELS] = [0.485, 0.456, 0.406];
pub const STD: [f32; CHANNELS] = [0.229, 0.224, 0.225];

/// Normalised image in channel-first layout `(3, 224, 224)`.
pub type Tensor3D = Array3<f32>;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decodes an uploaded image and turns it into the normalised network input.
///
/// The image is stretched to 224x224; aspect ratio is not preserved. Alpha is
/// dropped, intensities are scaled to `[0, 1]` and each channel is normalised
/// with [`MEAN`] and [`STD`].
pub fn preprocess(image_bytes: &[u8]) -> Result<Tensor3D, PreprocessError> {
    let rgb = image::load_from_memory(image_bytes)?.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    let mut tensor = Array3::<f32>::zeros((CHANNELS, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..CHANNELS {
            let value = f32::from(pixel[c]) / 255.0;
            tensor[[c, y as usize, x as usize]] = (value - MEAN[c]) / STD[c];
        }
    }
    Ok(tensor)
}
