//! Background images: the portrait cover-crop fed to FFmpeg, and the default
//! gradient generated on first run.

use std::{
  fs::{self, File},
  io::{BufWriter, Write},
  path::Path,
};

use image::{
  codecs::jpeg::JpegEncoder,
  imageops::{self, FilterType},
  ExtendedColorType, Rgb, RgbImage,
};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const GRADIENT_WIDTH: u32 = 1920;
pub const GRADIENT_HEIGHT: u32 = 1080;
pub const JPEG_QUALITY: u8 = 95;

/// Scale `src` to cover a `width`x`height` frame without distorting it, then
/// crop the overflow evenly from both sides.
///
/// Images wider than the target aspect ratio are scaled to the target height
/// and cropped horizontally; taller ones are scaled to the target width and
/// cropped vertically.
pub fn prepare_background(src: &Path, width: u32, height: u32) -> Result<RgbImage> {
  if !src.is_file() {
    return Err(Error::missing("Background image", src));
  }
  let image = image::open(src)?.to_rgb8();
  Ok(cover_crop(&image, width, height))
}

/// The pure part of [`prepare_background`].
pub fn cover_crop(image: &RgbImage, width: u32, height: u32) -> RgbImage {
  let (src_w, src_h) = (image.width().max(1) as u64, image.height().max(1) as u64);
  let (dst_w, dst_h) = (width as u64, height as u64);

  let too_wide = src_w * dst_h > dst_w * src_h;
  let (scaled_w, scaled_h) = if too_wide {
    ((src_w * dst_h / src_h).max(dst_w), dst_h)
  } else {
    (dst_w, (src_h * dst_w / src_w).max(dst_h))
  };
  debug!(src_w, src_h, scaled_w, scaled_h, "Scaling background");

  let scaled = imageops::resize(image, scaled_w as u32, scaled_h as u32, FilterType::Lanczos3);
  let x = ((scaled_w - dst_w) / 2) as u32;
  let y = ((scaled_h - dst_h) / 2) as u32;
  imageops::crop_imm(&scaled, x, y, width, height).to_image()
}

/// Encode `image` as a JPEG at `path`.
pub fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
  let mut writer = BufWriter::new(File::create(path)?);
  {
    let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    encoder.encode(
      image.as_raw(),
      image.width(),
      image.height(),
      ExtendedColorType::Rgb8,
    )?;
  }
  writer.flush()?;
  Ok(())
}

/// A dark blue-grey gradient fading to black towards the bottom, softened
/// with a small blur.
pub fn gradient_image() -> RgbImage {
  let image = RgbImage::from_fn(GRADIENT_WIDTH, GRADIENT_HEIGHT, |_, y| {
    let fade = 1.0 - y as f32 / GRADIENT_HEIGHT as f32;
    Rgb([
      (20.0 * fade) as u8,
      (25.0 * fade) as u8,
      (35.0 * fade) as u8,
    ])
  });
  imageops::blur(&image, 2.0)
}

/// Write the default gradient background to `path`, creating its directory.
pub fn create_gradient_background(path: &Path) -> Result<()> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent)?;
  }
  write_jpeg(&gradient_image(), path, JPEG_QUALITY)?;
  info!(path = %path.display(), "Background created");
  Ok(())
}
