//! Conversion between [`ImageMessage`] buffers and `image` crate buffers.
//!
//! Incoming frames are decoded into an RGB working copy (the annotation
//! canvas) from which the grayscale detector input is derived.  Rows may be
//! padded: `step` is the byte stride between row starts.

use image::{GrayImage, Rgb, RgbImage, imageops};
use tagpose_types::{FrameHeader, ImageMessage, TagError};

/// Encodings accepted by [`decode`].
pub const SUPPORTED_ENCODINGS: [&str; 5] = ["rgb8", "bgr8", "rgba8", "bgra8", "mono8"];

/// Decode `msg` into an RGB image.
///
/// # Errors
///
/// [`TagError::ImageDecode`] for an unsupported encoding, a zero-sized
/// image, a stride shorter than one row, or a buffer too small for the
/// declared geometry.
pub fn decode(msg: &ImageMessage) -> Result<RgbImage, TagError> {
    let channels: usize = match msg.encoding.as_str() {
        "rgb8" | "bgr8" => 3,
        "rgba8" | "bgra8" => 4,
        "mono8" => 1,
        other => {
            return Err(TagError::ImageDecode(format!(
                "unsupported encoding '{other}' (expected one of {})",
                SUPPORTED_ENCODINGS.join(", ")
            )));
        }
    };

    let (width, height) = (msg.width as usize, msg.height as usize);
    if width == 0 || height == 0 {
        return Err(TagError::ImageDecode(format!(
            "empty image {}x{}",
            msg.width, msg.height
        )));
    }
    let row_bytes = width * channels;
    let step = msg.step as usize;
    if step < row_bytes {
        return Err(TagError::ImageDecode(format!(
            "step {step} shorter than a {row_bytes}-byte row"
        )));
    }
    let needed = step * (height - 1) + row_bytes;
    if msg.data.len() < needed {
        return Err(TagError::ImageDecode(format!(
            "buffer holds {} bytes, {}x{} {} needs {needed}",
            msg.data.len(),
            msg.width,
            msg.height,
            msg.encoding
        )));
    }

    let swap = msg.encoding.starts_with("bgr");
    let mut out = RgbImage::new(msg.width, msg.height);
    for (y, row) in msg.data.chunks(step).take(height).enumerate() {
        for (x, px) in row[..row_bytes].chunks_exact(channels).enumerate() {
            let rgb = match (channels, swap) {
                (1, _) => [px[0], px[0], px[0]],
                (_, true) => [px[2], px[1], px[0]],
                (_, false) => [px[0], px[1], px[2]],
            };
            out.put_pixel(x as u32, y as u32, Rgb(rgb));
        }
    }
    Ok(out)
}

/// Luma conversion used as detector input.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    imageops::grayscale(image)
}

/// Pack `image` as an `rgb8` message under `header`.
pub fn encode_rgb(header: &FrameHeader, image: &RgbImage) -> ImageMessage {
    ImageMessage {
        header: header.clone(),
        width: image.width(),
        height: image.height(),
        encoding: "rgb8".to_string(),
        step: image.width() * 3,
        data: image.as_raw().clone(),
    }
}
