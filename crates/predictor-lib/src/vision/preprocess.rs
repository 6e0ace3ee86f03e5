use crate::preprocessing::Vocabulary;
use crate::{ModelError, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array2, Array3, Array4, Axis};

/// RGB input channels
pub const CHANNELS: usize = 3;

/// Divisor mapping 8-bit pixel values into `[0, 1]`
pub const PIXEL_SCALE: f32 = 255.0;

/// Resize to `size x size`, drop alpha and scale into a channel-first
/// `(3, size, size)` tensor.
pub fn image_tensor(image: &DynamicImage, size: u32, pixel_scale: f32) -> Array3<f32> {
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let side = size as usize;

    let mut out = Array3::zeros((CHANNELS, side, side));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for (c, value) in pixel.0.iter().enumerate() {
            out[[c, y as usize, x as usize]] = *value as f32 / pixel_scale;
        }
    }
    out
}

/// Stack images into a `(n, 3, size, size)` batch.
pub fn image_batch<'a, I>(images: I, size: u32, pixel_scale: f32) -> Array4<f32>
where
    I: IntoIterator<Item = &'a DynamicImage>,
    I::IntoIter: ExactSizeIterator,
{
    let images = images.into_iter();
    let side = size as usize;
    let mut batch = Array4::zeros((images.len(), CHANNELS, side, side));

    for (mut slot, image) in batch.outer_iter_mut().zip(images) {
        slot.assign(&image_tensor(image, size, pixel_scale));
    }
    batch
}

/// One-hot rows over `vocabulary`; a label outside it is `UnknownLabel`.
pub fn one_hot<S: AsRef<str>>(labels: &[S], vocabulary: &Vocabulary) -> Result<Array2<f32>> {
    let mut y = Array2::zeros((labels.len(), vocabulary.len()));
    for (mut row, label) in y.axis_iter_mut(Axis(0)).zip(labels) {
        let label = label.as_ref();
        let index = vocabulary
            .index_of(label)
            .ok_or_else(|| ModelError::UnknownLabel(label.to_string()))?;
        row[index] = 1.0;
    }
    Ok(y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, RgbaImage};

    #[test]
    fn test_tensor_is_channel_first_and_scaled() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 51])));
        let t = image_tensor(&img, 4, PIXEL_SCALE);

        assert_eq!(t.dim(), (3, 4, 4));
        assert!(t.index_axis(Axis(0), 0).iter().all(|v| *v == 1.0));
        assert!(t.index_axis(Axis(0), 1).iter().all(|v| *v == 0.0));
        assert!((t[[2, 1, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_resizes_and_drops_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(50, 20));
        let batch = image_batch([&img, &img], 32, PIXEL_SCALE);
        assert_eq!(batch.dim(), (2, 3, 32, 32));
    }

    #[test]
    fn test_one_hot_and_unknown_label() {
        let vocab = Vocabulary::new(["chair", "ring", "vase"]);
        let y = one_hot(&["Ring", " vase "], &vocab).unwrap();
        assert_eq!(y.row(0).to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(y.row(1).to_vec(), vec![0.0, 0.0, 1.0]);

        let err = one_hot(&["sofa"], &vocab).unwrap_err();
        assert!(matches!(err, ModelError::UnknownLabel(l) if l == "sofa"));
    }
}
