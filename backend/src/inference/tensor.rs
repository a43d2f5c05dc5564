use image::imageops::{self, FilterType};
use ndarray::Array4;

use crate::imaging::NormalizedImage;

pub const INPUT_SIZE: u32 = 224;
pub const RESIZE_SHORTER: u32 = 256;
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// NCHW float tensor, shape `[1, 3, 224, 224]`.
pub type ModelInput = Array4<f32>;

/// Shorter side to 256, center crop to 224, ImageNet mean/std.
pub fn prepare_input(image: &NormalizedImage) -> ModelInput {
    let rgb = image.as_rgb();
    let (w, h) = (rgb.width(), rgb.height());
    let scale = RESIZE_SHORTER as f32 / w.min(h) as f32;
    let rw = ((w as f32 * scale).round() as u32).max(INPUT_SIZE);
    let rh = ((h as f32 * scale).round() as u32).max(INPUT_SIZE);

    let resized = imageops::resize(rgb, rw, rh, FilterType::Triangle);
    let x0 = (rw - INPUT_SIZE) / 2;
    let y0 = (rh - INPUT_SIZE) / 2;
    let cropped = imageops::crop_imm(&resized, x0, y0, INPUT_SIZE, INPUT_SIZE).to_image();

    let side = INPUT_SIZE as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        let value = cropped.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c]
    })
}

/// Largest relative error of [`round_to_reduced`] on normal values.
pub const REDUCED_UNIT_ROUNDOFF: f32 = 1.0 / 256.0;

/// Rounds to the nearest bfloat16 value (ties to even), kept in an f32.
pub fn round_to_reduced(value: f32) -> f32 {
    if !value.is_finite() {
        return value;
    }
    let bits = value.to_bits();
    let rounding = 0x7fff + ((bits >> 16) & 1);
    f32::from_bits(bits.wrapping_add(rounding) & 0xffff_0000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn input_has_fixed_shape() {
        for (w, h) in [(500, 500), (1024, 300), (40, 90)] {
            let image = NormalizedImage::from_rgb(RgbImage::from_pixel(w, h, Rgb([10, 20, 30])));
            let input = prepare_input(&image);
            assert_eq!(input.shape(), &[1, 3, 224, 224]);
        }
    }

    #[test]
    fn channels_are_standardized() {
        let image = NormalizedImage::from_rgb(RgbImage::from_pixel(300, 300, Rgb([255, 0, 128])));
        let input = prepare_input(&image);
        let red = input[[0, 0, 100, 100]];
        let green = input[[0, 1, 100, 100]];
        assert!((red - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        assert!((green - (0.0 - 0.456) / 0.224).abs() < 1e-4);
    }

    #[test]
    fn reduced_rounding_is_close_and_idempotent() {
        for value in [0.0f32, 1.0, -3.14159, 1234.567, 1e-20, -0.333] {
            let reduced = round_to_reduced(value);
            assert!((reduced - value).abs() <= value.abs() * REDUCED_UNIT_ROUNDOFF);
            assert_eq!(round_to_reduced(reduced), reduced);
        }
        assert!(round_to_reduced(f32::NAN).is_nan());
    }
}
