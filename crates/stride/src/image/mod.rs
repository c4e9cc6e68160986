//! Image type used for camera frames and overlay rendering.

pub mod draw;

use std::{fmt, ops::Index, path::Path};

use embedded_graphics::{pixelcolor::raw::RawU32, prelude::PixelColor};
use image::{ImageBuffer, Rgba, RgbaImage};

/// Width and height of an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the length of the shorter side.
    #[inline]
    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An 8-bit sRGB image with alpha channel.
#[derive(Clone)]
pub struct Image {
    pub(crate) buf: RgbaImage,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({})", self.resolution())
    }
}

impl Image {
    /// Creates an empty image of a specified size.
    ///
    /// The image will start out black and fully transparent.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: ImageBuffer::new(width, height),
        }
    }

    /// Wraps a tightly packed RGBA buffer.
    pub fn from_rgba8(res: Resolution, buf: Vec<u8>) -> anyhow::Result<Self> {
        let len = buf.len();
        match ImageBuffer::from_vec(res.width(), res.height(), buf) {
            Some(buf) => Ok(Self { buf }),
            None => anyhow::bail!("incorrect buffer size {len} for {res} image"),
        }
    }

    /// Loads a JPEG or PNG image from the filesystem.
    pub fn load<A: AsRef<Path>>(path: A) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("jpg" | "jpeg") => image::ImageFormat::Jpeg,
            Some("png") => image::ImageFormat::Png,
            _ => anyhow::bail!(
                "invalid image path '{}' (must have one of the supported extensions)",
                path.display()
            ),
        };
        let data = std::fs::read(path)?;
        let buf = image::load_from_memory_with_format(&data, format)?.to_rgba8();
        Ok(Self { buf })
    }

    /// Saves the image. The format is derived from the file extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        Ok(self.buf.save(path.as_ref())?)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Gets the image color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Color {
        Color(self.buf[(x, y)].0)
    }

    /// Returns whether the image has no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Samples the pixel nearest to the normalized coordinates `(u, v)`, clamped to the image.
    ///
    /// An empty image samples as transparent black.
    pub fn sample(&self, u: f32, v: f32) -> Color {
        if self.is_empty() {
            return Color::NONE;
        }
        let x = (u * self.width() as f32) as u32;
        let y = (v * self.height() as f32) as u32;
        self.get(
            x.min(self.width().saturating_sub(1)),
            y.min(self.height().saturating_sub(1)),
        )
    }

    /// Sets the pixel at `(x, y)`. Out-of-bounds writes are ignored.
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        if x < self.width() && y < self.height() {
            self.buf[(x, y)] = Rgba(color.0);
        }
    }

    pub fn clear(&mut self, color: Color) {
        for pixel in self.buf.pixels_mut() {
            *pixel = Rgba(color.0);
        }
    }

    /// Returns the raw RGBA bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf
    }
}

/// An 8-bit RGBA color.
///
/// Colors are always in the sRGB color space and use non-premultiplied alpha.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Color(pub(crate) [u8; 4]);

impl Color {
    pub const NONE: Self = Self([0, 0, 0, 0]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    pub const WHITE: Self = Self([255, 255, 255, 255]);
    pub const RED: Self = Self([255, 0, 0, 255]);
    pub const GREEN: Self = Self([0, 255, 0, 255]);
    pub const BLUE: Self = Self([0, 0, 255, 255]);
    pub const CYAN: Self = Self([0, 255, 255, 255]);
    pub const ORANGE: Self = Self([255, 140, 0, 255]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.0[3]
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r(),
            self.g(),
            self.b(),
            self.a(),
        )
    }
}

impl Index<usize> for Color {
    type Output = u8;

    #[inline]
    fn index(&self, index: usize) -> &u8 {
        &self.0[index]
    }
}

impl PixelColor for Color {
    type Raw = RawU32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_buffer_size_is_checked() {
        assert!(Image::from_rgba8(Resolution::new(2, 2), vec![0; 15]).is_err());
        let image = Image::from_rgba8(Resolution::new(2, 2), vec![7; 16]).unwrap();
        assert_eq!(image.get(1, 1), Color([7; 4]));
    }

    #[test]
    fn sample_clamps_to_edges() {
        let mut image = Image::new(4, 2);
        image.set(3, 1, Color::RED);
        image.set(10, 10, Color::GREEN);
        assert_eq!(image.sample(1.0, 1.0), Color::RED);
        assert_eq!(image.sample(0.0, 0.0), Color::NONE);
    }

    #[test]
    fn empty_image_samples_transparent() {
        for image in [Image::new(0, 0), Image::new(3, 0)] {
            assert!(image.is_empty());
            assert_eq!(image.sample(0.5, 0.5), Color::NONE);
        }
        assert!(!Image::new(1, 1).is_empty());
    }
}
