//! Decoded rasters and the pixel operations the conversion pipeline needs.
//!
//! A [`Raster`] is a tightly packed, row-major texel buffer of 8 or 16 bits
//! per channel. Every buffer is allocated with `try_reserve` so a texture too
//! large for memory fails its own conversion instead of the whole process.

use std::{collections::TryReserveError, path::Path};

use image::{
    DynamicImage, ImageBuffer, ImageReader, Luma, LumaA, Pixel, Rgb, Rgba,
    imageops::{self, FilterType},
};

use crate::error::ConvertError;

#[derive(Clone, Debug, PartialEq)]
pub enum Texels {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub texels: Texels,
}

fn alloc<T>(len: usize) -> Result<Vec<T>, TryReserveError> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len)?;
    Ok(buffer)
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(l: f32) -> f32 {
    if l <= 0.003_130_8 {
        l * 12.92
    } else {
        1.055 * l.powf(1.0 / 2.4) - 0.055
    }
}

/// Resamples a float buffer with a cubic filter. `None` if the buffer does
/// not match its dimensions.
fn resample<P>(width: u32, height: u32, data: Vec<f32>, new_width: u32, new_height: u32) -> Option<Vec<f32>>
where
    P: Pixel<Subpixel = f32> + 'static,
{
    let source = ImageBuffer::<P, Vec<f32>>::from_raw(width, height, data)?;
    Some(imageops::resize(&source, new_width, new_height, FilterType::CatmullRom).into_raw())
}

impl Raster {
    pub fn load(path: &Path) -> Result<Self, ConvertError> {
        let image = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|source| ConvertError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .decode()
            .map_err(|source| ConvertError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_image(image))
    }

    /// Keeps the channel layout and depth of the source where possible.
    /// Float images are narrowed to 16 bits.
    pub fn from_image(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (channels, texels) = match image {
            DynamicImage::ImageLuma8(buffer) => (1, Texels::U8(buffer.into_raw())),
            DynamicImage::ImageLumaA8(buffer) => (2, Texels::U8(buffer.into_raw())),
            DynamicImage::ImageRgb8(buffer) => (3, Texels::U8(buffer.into_raw())),
            DynamicImage::ImageRgba8(buffer) => (4, Texels::U8(buffer.into_raw())),
            DynamicImage::ImageLuma16(buffer) => (1, Texels::U16(buffer.into_raw())),
            DynamicImage::ImageLumaA16(buffer) => (2, Texels::U16(buffer.into_raw())),
            DynamicImage::ImageRgb16(buffer) => (3, Texels::U16(buffer.into_raw())),
            DynamicImage::ImageRgba16(buffer) => (4, Texels::U16(buffer.into_raw())),
            rgb @ DynamicImage::ImageRgb32F(_) => (3, Texels::U16(rgb.to_rgb16().into_raw())),
            other => (4, Texels::U16(other.to_rgba16().into_raw())),
        };
        Self {
            width,
            height,
            channels,
            texels,
        }
    }

    pub fn from_u8(width: u32, height: u32, channels: u8, texels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            texels: Texels::U8(texels),
        }
    }

    pub fn bits_per_channel(&self) -> u8 {
        match self.texels {
            Texels::U8(_) => 8,
            Texels::U16(_) => 16,
        }
    }

    fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// 8 bit texel bytes, `None` for deeper rasters.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.texels {
            Texels::U8(texels) => Some(texels),
            Texels::U16(_) => None,
        }
    }

    /// A single channel raster holding `channel` of every texel.
    pub fn extract_channel(&self, channel: u8) -> Result<Raster, TryReserveError> {
        fn pick<T: Copy>(texels: &[T], channels: u8, channel: u8, len: usize) -> Result<Vec<T>, TryReserveError> {
            let mut out = alloc(len)?;
            out.extend(
                texels
                    .chunks_exact(channels as usize)
                    .map(|texel| texel[channel as usize]),
            );
            Ok(out)
        }
        let len = self.texel_count();
        let texels = match &self.texels {
            Texels::U8(texels) => Texels::U8(pick(texels, self.channels, channel, len)?),
            Texels::U16(texels) => Texels::U16(pick(texels, self.channels, channel, len)?),
        };
        Ok(Raster {
            width: self.width,
            height: self.height,
            channels: 1,
            texels,
        })
    }

    /// Whether every texel equals the first one.
    pub fn is_uniform(&self) -> bool {
        fn uniform<T: PartialEq>(texels: &[T], channels: u8) -> bool {
            let mut chunks = texels.chunks_exact(channels as usize);
            match chunks.next() {
                Some(first) => chunks.all(|texel| texel == first),
                None => true,
            }
        }
        match &self.texels {
            Texels::U8(texels) => uniform(texels, self.channels),
            Texels::U16(texels) => uniform(texels, self.channels),
        }
    }

    /// Rescales 16 bit channels to 8 bits, rounding to the nearest value.
    pub fn to_8bit(self) -> Result<Raster, TryReserveError> {
        let texels = match self.texels {
            Texels::U8(texels) => texels,
            Texels::U16(texels) => {
                let mut out = alloc(texels.len())?;
                out.extend(texels.iter().map(|&value| ((u32::from(value) + 128) / 257) as u8));
                out
            }
        };
        Ok(Raster {
            texels: Texels::U8(texels),
            ..self
        })
    }

    /// Rescales the first three channels of every texel to a unit vector in
    /// `[-1, 1]` space and re-encodes it. The result always has three
    /// channels. Expects an 8 bit raster with at least three channels.
    pub fn renormalize(&self) -> Result<Raster, TryReserveError> {
        let Some(texels) = self.bytes().filter(|_| self.channels >= 3) else {
            return Ok(self.clone());
        };
        let mut out = alloc(self.texel_count() * 3)?;
        for texel in texels.chunks_exact(self.channels as usize) {
            let [x, y, z] = [texel[0], texel[1], texel[2]].map(|c| f32::from(c) / 127.5 - 1.0);
            let length = (x * x + y * y + z * z).sqrt();
            let unit = if length > f32::EPSILON {
                [x / length, y / length, z / length]
            } else {
                [0.0, 0.0, 1.0]
            };
            out.extend(unit.map(|v| ((v + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8));
        }
        Ok(Raster::from_u8(self.width, self.height, 3, out))
    }

    /// Resamples an 8 bit raster to the given size in floating point. With
    /// `srgb` the colour channels are filtered in linear space; alpha always
    /// is.
    pub fn resized(&self, width: u32, height: u32, srgb: bool) -> Result<Raster, ConvertError> {
        let Some(texels) = self.bytes() else {
            return Err(ConvertError::Resample("expected an 8 bit raster".to_string()));
        };
        let channels = self.channels as usize;
        // Luma+alpha and RGBA carry alpha in their last channel
        let colour_channels = if channels == 2 || channels == 4 {
            channels - 1
        } else {
            channels
        };
        let to_float = |(i, &c): (usize, &u8)| {
            let value = f32::from(c) / 255.0;
            if srgb && i % channels < colour_channels {
                srgb_to_linear(value)
            } else {
                value
            }
        };
        let mut source = alloc(texels.len())?;
        source.extend(texels.iter().enumerate().map(to_float));

        let resampled = match channels {
            1 => resample::<Luma<f32>>(self.width, self.height, source, width, height),
            2 => resample::<LumaA<f32>>(self.width, self.height, source, width, height),
            3 => resample::<Rgb<f32>>(self.width, self.height, source, width, height),
            4 => resample::<Rgba<f32>>(self.width, self.height, source, width, height),
            _ => None,
        };
        let Some(resampled) = resampled else {
            return Err(ConvertError::Resample(format!(
                "cannot resample {channels} channel raster of {}x{}",
                self.width, self.height
            )));
        };

        let mut out = alloc(resampled.len())?;
        out.extend(resampled.iter().enumerate().map(|(i, &value)| {
            let value = if srgb && i % channels < colour_channels {
                linear_to_srgb(value.max(0.0))
            } else {
                value
            };
            (value * 255.0).round().clamp(0.0, 255.0) as u8
        }));
        Ok(Raster::from_u8(width, height, self.channels, out))
    }
}

/// Levels of a full mip chain down to 1x1.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height);
    (u32::BITS - largest.leading_zeros()).max(1)
}

/// Size of mip `level` of a `width` by `height` base level.
pub fn mip_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32, channels: u8) -> Raster {
        let texels = (0..width * height * channels as u32).map(|i| (i % 256) as u8).collect();
        Raster::from_u8(width, height, channels, texels)
    }

    #[test]
    fn mip_chain_reaches_one_texel() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(256, 256), 9);
        assert_eq!(mip_levels(300, 100), 9);
        assert_eq!(mip_size(300, 100, 8), (1, 1));
        assert_eq!(mip_size(300, 100, 2), (75, 25));
    }

    #[test]
    fn extracts_single_channel() {
        let raster = Raster::from_u8(2, 1, 3, vec![1, 2, 3, 4, 5, 6]);
        let green = raster.extract_channel(1).unwrap();
        assert_eq!(green.channels, 1);
        assert_eq!(green.bytes(), Some(&[2u8, 5][..]));
    }

    #[test]
    fn uniformity_looks_at_whole_texels() {
        assert!(Raster::from_u8(2, 2, 2, vec![7, 9, 7, 9, 7, 9, 7, 9]).is_uniform());
        assert!(!Raster::from_u8(2, 1, 2, vec![7, 9, 7, 8]).is_uniform());
    }

    #[test]
    fn narrowing_rounds_to_nearest() {
        let raster = Raster {
            width: 6,
            height: 1,
            channels: 1,
            texels: Texels::U16(vec![0, 128, 129, 0x12FF, 0x7FFF, 0xFFFF]),
        };
        let narrowed = raster.to_8bit().unwrap();
        assert_eq!(narrowed.bytes(), Some(&[0u8, 0, 1, 0x13, 0x7F, 0xFF][..]));
    }

    #[test]
    fn renormalized_normals_are_unit_length_and_drop_alpha() {
        let raster = Raster::from_u8(2, 1, 4, vec![128, 128, 192, 10, 255, 128, 128, 20]);
        let normals = raster.renormalize().unwrap();
        assert_eq!(normals.channels, 3);
        let texels = normals.bytes().unwrap();
        assert_eq!(texels.len(), 6);
        for texel in texels.chunks_exact(3) {
            let v: Vec<f32> = texel.iter().map(|&c| f32::from(c) / 127.5 - 1.0).collect();
            let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            assert!((length - 1.0).abs() < 0.02, "length {length}");
        }
        assert_eq!(texels[2], 255);
    }

    #[test]
    fn resizing_a_flat_colour_keeps_it() {
        let raster = Raster::from_u8(4, 4, 4, [200u8, 100, 50, 255].repeat(16));
        let half = raster.resized(2, 2, true).unwrap();
        assert_eq!((half.width, half.height, half.channels), (2, 2, 4));
        for texel in half.bytes().unwrap().chunks_exact(4) {
            for (got, want) in texel.iter().zip([200u8, 100, 50, 255]) {
                assert!(got.abs_diff(want) <= 1, "{texel:?}");
            }
        }
    }

    #[test]
    fn resizing_reaches_single_texel() {
        let raster = gradient(8, 4, 1);
        let last = raster.resized(1, 1, false).unwrap();
        assert_eq!(last.bytes().map(<[u8]>::len), Some(1));
    }
}
