//! KTX2 container writer.
//!
//! Only what the optimiser produces is supported: 2D, single layer, single
//! face textures of 8 bit UNORM/sRGB formats with a full mip chain. Levels
//! are encoded by a [`BlockEncoder`] and optionally zlib supercompressed.

use std::{
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

use flate2::{Compression, write::ZlibEncoder};

use crate::{error::ConvertError, resources::texture::Raster};

pub const IDENTIFIER: [u8; 12] = [0xAB, 0x4B, 0x54, 0x58, 0x20, 0x32, 0x30, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A];

const HEADER_LEN: usize = 80;
const LEVEL_INDEX_ENTRY_LEN: usize = 24;

const KHR_DF_MODEL_RGBSDA: u8 = 1;
const KHR_DF_PRIMARIES_BT709: u8 = 1;
const KHR_DF_TRANSFER_LINEAR: u8 = 1;
const KHR_DF_TRANSFER_SRGB: u8 = 2;
const KHR_DF_CHANNEL_ALPHA: u8 = 15;
const KHR_DF_SAMPLE_DATATYPE_LINEAR: u8 = 0x10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum VkFormat {
    R8Unorm = 9,
    R8Srgb = 15,
    R8G8Unorm = 16,
    R8G8Srgb = 22,
    R8G8B8Unorm = 23,
    R8G8B8Srgb = 29,
    R8G8B8A8Unorm = 37,
    R8G8B8A8Srgb = 43,
}

impl VkFormat {
    /// 8 bit format for a texel layout. Colour data with fewer than three
    /// channels is stored linear.
    pub fn for_channels(channels: u8, srgb: bool) -> Option<Self> {
        Some(match (channels, srgb) {
            (1, _) => Self::R8Unorm,
            (2, _) => Self::R8G8Unorm,
            (3, false) => Self::R8G8B8Unorm,
            (3, true) => Self::R8G8B8Srgb,
            (4, false) => Self::R8G8B8A8Unorm,
            (4, true) => Self::R8G8B8A8Srgb,
            _ => return None,
        })
    }

    pub fn channels(self) -> u8 {
        match self {
            Self::R8Unorm | Self::R8Srgb => 1,
            Self::R8G8Unorm | Self::R8G8Srgb => 2,
            Self::R8G8B8Unorm | Self::R8G8B8Srgb => 3,
            Self::R8G8B8A8Unorm | Self::R8G8B8A8Srgb => 4,
        }
    }

    pub fn is_srgb(self) -> bool {
        matches!(
            self,
            Self::R8Srgb | Self::R8G8Srgb | Self::R8G8B8Srgb | Self::R8G8B8A8Srgb
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum Supercompression {
    None = 0,
    #[default]
    Zlib = 3,
}

/// Encodes the texels of one mip level into the payload stored in the
/// container.
pub trait BlockEncoder: Send + Sync {
    fn name(&self) -> &str;

    /// Container format for rasters with `channels` channels.
    fn format(&self, channels: u8, srgb: bool) -> Option<VkFormat>;

    fn encode(&self, level: &Raster, normal_map: bool) -> Result<Vec<u8>, ConvertError>;

    /// Whether the payload is Basis Universal. Only such files may be
    /// referenced through `KHR_texture_basisu`.
    fn is_basis(&self) -> bool {
        false
    }

    /// `KHR_texture_basisu` allows no supercompression other than zstd, which
    /// is not available here.
    fn supercompression(&self) -> Supercompression {
        if self.is_basis() {
            Supercompression::None
        } else {
            Supercompression::Zlib
        }
    }
}

/// Stores 8 bit texels as they are.
#[derive(Clone, Copy, Debug, Default)]
pub struct Uncompressed;

impl BlockEncoder for Uncompressed {
    fn name(&self) -> &str {
        "uncompressed"
    }

    fn format(&self, channels: u8, srgb: bool) -> Option<VkFormat> {
        VkFormat::for_channels(channels, srgb)
    }

    fn encode(&self, level: &Raster, _normal_map: bool) -> Result<Vec<u8>, ConvertError> {
        let bytes = level
            .bytes()
            .ok_or_else(|| ConvertError::Resample("expected an 8 bit raster".to_string()))?;
        let mut out = Vec::new();
        out.try_reserve_exact(bytes.len())?;
        out.extend_from_slice(bytes);
        Ok(out)
    }
}

#[derive(Clone, Debug)]
pub struct Ktx2Texture {
    pub format: VkFormat,
    pub width: u32,
    pub height: u32,
    /// Encoded levels, base level first.
    pub levels: Vec<Vec<u8>>,
    pub supercompression: Supercompression,
    pub writer: String,
}

fn align(len: usize, alignment: usize) -> usize {
    len.div_ceil(alignment) * alignment
}

fn pad(out: &mut Vec<u8>, alignment: usize) {
    out.resize(align(out.len(), alignment), 0);
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn zlib(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

impl Ktx2Texture {
    pub fn new(format: VkFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            levels: Vec::new(),
            supercompression: Supercompression::default(),
            writer: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_supercompression(mut self, scheme: Supercompression) -> Self {
        self.supercompression = scheme;
        self
    }

    pub fn push_level(&mut self, data: Vec<u8>) {
        self.levels.push(data);
    }

    fn data_format_descriptor(&self) -> Vec<u8> {
        let channels = self.format.channels();
        let srgb = self.format.is_srgb();
        let block_len = 24 + 16 * usize::from(channels);

        let mut dfd = Vec::with_capacity(4 + block_len);
        put_u32(&mut dfd, (4 + block_len) as u32);
        // vendor 0 (Khronos), descriptor type 0 (basic)
        put_u32(&mut dfd, 0);
        dfd.extend_from_slice(&2u16.to_le_bytes());
        dfd.extend_from_slice(&(block_len as u16).to_le_bytes());
        dfd.extend_from_slice(&[
            KHR_DF_MODEL_RGBSDA,
            KHR_DF_PRIMARIES_BT709,
            if srgb { KHR_DF_TRANSFER_SRGB } else { KHR_DF_TRANSFER_LINEAR },
            0,
        ]);
        // 1x1x1x1 texel block
        dfd.extend_from_slice(&[0, 0, 0, 0]);
        dfd.extend_from_slice(&[channels, 0, 0, 0, 0, 0, 0, 0]);
        for channel in 0..channels {
            let alpha = channels == 4 && channel == 3;
            let mut channel_type = if alpha { KHR_DF_CHANNEL_ALPHA } else { channel };
            if alpha && srgb {
                channel_type |= KHR_DF_SAMPLE_DATATYPE_LINEAR;
            }
            dfd.extend_from_slice(&(u16::from(channel) * 8).to_le_bytes());
            dfd.extend_from_slice(&[7, channel_type]);
            dfd.extend_from_slice(&[0, 0, 0, 0]);
            put_u32(&mut dfd, 0);
            put_u32(&mut dfd, 255);
        }
        dfd
    }

    fn key_value_data(&self) -> Vec<u8> {
        let mut kvd = Vec::new();
        let mut entry = b"KTXwriter\0".to_vec();
        entry.extend_from_slice(self.writer.as_bytes());
        entry.push(0);
        put_u32(&mut kvd, entry.len() as u32);
        kvd.extend_from_slice(&entry);
        pad(&mut kvd, 4);
        kvd
    }

    /// Serialises the container. Level data is laid out smallest level first.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let level_count = self.levels.len();
        let dfd = self.data_format_descriptor();
        let kvd = self.key_value_data();

        let payloads = self
            .levels
            .iter()
            .map(|level| match self.supercompression {
                Supercompression::None => Ok(level.clone()),
                Supercompression::Zlib => zlib(level),
            })
            .collect::<io::Result<Vec<_>>>()?;

        let level_alignment = match self.supercompression {
            Supercompression::None => {
                let texel = usize::from(self.format.channels());
                // lcm(texel size, 4)
                if texel % 4 == 0 {
                    texel
                } else if texel % 2 == 0 {
                    texel * 2
                } else {
                    texel * 4
                }
            }
            Supercompression::Zlib => 1,
        };

        let dfd_offset = HEADER_LEN + LEVEL_INDEX_ENTRY_LEN * level_count;
        let kvd_offset = dfd_offset + dfd.len();
        let mut data_offset = kvd_offset + kvd.len();

        let mut offsets = vec![0usize; payloads.len()];
        for (level, payload) in payloads.iter().enumerate().rev() {
            data_offset = align(data_offset, level_alignment);
            offsets[level] = data_offset;
            data_offset += payload.len();
        }

        let mut out = Vec::with_capacity(data_offset);
        out.extend_from_slice(&IDENTIFIER);
        put_u32(&mut out, self.format as u32);
        // typeSize
        put_u32(&mut out, 1);
        put_u32(&mut out, self.width);
        put_u32(&mut out, self.height);
        // depth, layers, faces
        put_u32(&mut out, 0);
        put_u32(&mut out, 0);
        put_u32(&mut out, 1);
        put_u32(&mut out, self.levels.len() as u32);
        put_u32(&mut out, self.supercompression as u32);

        put_u32(&mut out, dfd_offset as u32);
        put_u32(&mut out, dfd.len() as u32);
        put_u32(&mut out, kvd_offset as u32);
        put_u32(&mut out, kvd.len() as u32);
        put_u64(&mut out, 0);
        put_u64(&mut out, 0);

        for ((payload, level), offset) in payloads.iter().zip(&self.levels).zip(&offsets) {
            put_u64(&mut out, *offset as u64);
            put_u64(&mut out, payload.len() as u64);
            put_u64(&mut out, level.len() as u64);
        }
        out.resize(dfd_offset, 0);
        out.extend_from_slice(&dfd);
        out.extend_from_slice(&kvd);

        for (level, payload) in payloads.iter().enumerate().rev() {
            out.resize(offsets[level], 0);
            out.extend_from_slice(payload);
        }
        Ok(out)
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let bytes = self.to_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()
    }
}

/// Whether `path` starts with the KTX2 identifier.
pub fn is_ktx2_file(path: &Path) -> bool {
    let mut identifier = [0u8; 12];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut identifier))
        .is_ok_and(|()| identifier == IDENTIFIER)
}
