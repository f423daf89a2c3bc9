//! Image decoding and encoding.
//!
//! Images enter the core as `[1, 3, size, size]` F32 tensors normalized with
//! ImageNet statistics and leave it through the inverse transform, clamped
//! to `[0, 1]` and quantized to 8 bits.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use pastiche_core::image::{image_dims, IMAGENET_MEAN, IMAGENET_STD};
use std::path::Path;

fn channel_stats(values: [f32; 3], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(&values, (1, 3, 1, 1), device)?)
}

/// Resize `img` to `size x size` (Lanczos3) and normalize it.
pub fn image_to_tensor(img: &DynamicImage, size: u32, device: &Device) -> Result<Tensor> {
    let rgb = img.resize_exact(size, size, FilterType::Lanczos3).to_rgb8();
    let (width, height) = rgb.dimensions();

    let pixels = Tensor::from_vec(rgb.into_raw(), (height as usize, width as usize, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .unsqueeze(0)?;
    let pixels = (pixels / 255.0)?;

    let mean = channel_stats(IMAGENET_MEAN, device)?;
    let std = channel_stats(IMAGENET_STD, device)?;
    Ok(pixels.broadcast_sub(&mean)?.broadcast_div(&std)?.contiguous()?)
}

/// Undo normalization and quantize a `[1, 3, H, W]` tensor to an RGB image.
pub fn tensor_to_image(tensor: &Tensor) -> Result<RgbImage> {
    let (height, width) = image_dims(tensor)?;
    let device = tensor.device();

    let mean = channel_stats(IMAGENET_MEAN, device)?;
    let std = channel_stats(IMAGENET_STD, device)?;
    let pixels = tensor
        .to_dtype(DType::F32)?
        .broadcast_mul(&std)?
        .broadcast_add(&mean)?
        .clamp(0f32, 1f32)?;
    // Round to nearest instead of truncating.
    let pixels = ((pixels * 255.0)? + 0.5)?;

    let data = pixels
        .squeeze(0)?
        .permute((1, 2, 0))?
        .to_dtype(DType::U8)?
        .flatten_all()?
        .to_vec1::<u8>()?;

    RgbImage::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))
}

/// Load an image file as a normalized `[1, 3, size, size]` tensor.
pub fn load_image(path: impl AsRef<Path>, size: u32, device: &Device) -> Result<Tensor> {
    let path = path.as_ref();
    let img = image::open(path).with_context(|| format!("decoding image {}", path.display()))?;
    image_to_tensor(&img, size, device)
        .with_context(|| format!("converting image {}", path.display()))
}

/// Write a normalized image tensor; the format follows the file extension.
pub fn save_image(tensor: &Tensor, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let img = tensor_to_image(&tensor.to_device(&Device::Cpu)?)?;
    img.save(path)
        .with_context(|| format!("writing image {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("pastiche-io-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn checkerboard(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([250, 20, 90])
            } else {
                Rgb([10, 200, 160])
            }
        })
    }

    #[test]
    fn tensor_layout_and_normalization() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 0, 128])));
        let tensor = image_to_tensor(&img, 8, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 8, 8]);

        let red: f32 = tensor.get(0).unwrap().get(0).unwrap().mean_all().unwrap().to_scalar().unwrap();
        let green: f32 = tensor.get(0).unwrap().get(1).unwrap().mean_all().unwrap().to_scalar().unwrap();
        assert!((red - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        assert!((green - (-0.456 / 0.224)).abs() < 1e-4);
    }

    #[test]
    fn resizes_to_square() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([1, 2, 3])));
        let tensor = image_to_tensor(&img, 16, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 16, 16]);
    }

    #[test]
    fn tensor_image_round_trip() {
        let original = checkerboard(16);
        let tensor =
            image_to_tensor(&DynamicImage::ImageRgb8(original.clone()), 16, &Device::Cpu).unwrap();
        let restored = tensor_to_image(&tensor).unwrap();

        assert_eq!(restored.dimensions(), (16, 16));
        for (a, b) in original.pixels().zip(restored.pixels()) {
            for c in 0..3 {
                assert!((a[c] as i32 - b[c] as i32).abs() <= 1, "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let tensor = Tensor::full(100f32, (1, 3, 2, 2), &Device::Cpu).unwrap();
        let img = tensor_to_image(&tensor).unwrap();
        assert!(img.pixels().all(|p| p.0 == [255, 255, 255]));

        let tensor = Tensor::full(-100f32, (1, 3, 2, 2), &Device::Cpu).unwrap();
        let img = tensor_to_image(&tensor).unwrap();
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn file_round_trip() {
        let dir = temp_dir("roundtrip");
        let source = dir.join("source.png");
        checkerboard(32).save(&source).unwrap();

        let tensor = load_image(&source, 32, &Device::Cpu).unwrap();
        let output = dir.join("nested").join("out.png");
        save_image(&tensor, &output).unwrap();

        let reloaded = image::open(&output).unwrap().to_rgb8();
        assert_eq!(reloaded.dimensions(), (32, 32));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_image("/nonexistent/picture.png", 32, &Device::Cpu).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/picture.png"));
    }

    #[test]
    fn rejects_non_image_tensor() {
        let tensor = Tensor::zeros((3, 4, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(tensor_to_image(&tensor).is_err());
    }
}
