//! Conversion of material textures to KTX2.
//!
//! Work is split in three steps so that only the expensive middle one runs
//! off the main thread:
//!
//! 1. [`plan`] walks the materials, marks every texture it visits and groups
//!    the textures that need converting into one [`ConversionJob`] per source
//!    file.
//! 2. [`TextureConverter::convert`] decodes the source, optionally splits
//!    and renormalizes it, builds the mip chain and writes the containers.
//!    It never touches the graph.
//! 3. [`apply`] points the textures of a successful job at the new file.

use std::{
    collections::HashMap,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    data_structures::{
        entities::Image,
        ids::{ImageId, TextureId},
        slots::SlotPolicy,
        store::{EntityStore, resolve_uri},
    },
    error::ConvertError,
    optimiser::Options,
    resources::{
        ktx2::{BlockEncoder, Ktx2Texture},
        texture::{Raster, mip_levels, mip_size},
    },
};

pub const KTX2_MIME_TYPE: &str = "image/ktx2";

/// Everything needed to convert one source file, shared by all textures
/// sampling it.
#[derive(Clone, Debug)]
pub struct ConversionJob {
    /// Decoded filesystem path of the source image.
    pub source: PathBuf,
    pub source_image: ImageId,
    /// URI of the source image as written in the document.
    pub uri: String,
    pub policy: SlotPolicy,
    pub textures: Vec<TextureId>,
    /// Name outputs after the whole source file name, `wood.jpg.ktx2`
    /// instead of `wood.ktx2`, because another source claimed the plain one.
    pub keep_extension: bool,
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(stem.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

/// `uri` without the extension of its last path segment.
fn strip_extension(uri: &str) -> &str {
    let segment = uri.rfind('/').map_or(0, |slash| slash + 1);
    match uri[segment..].rfind('.') {
        Some(dot) => &uri[..segment + dot],
        None => uri,
    }
}

impl ConversionJob {
    pub fn new(source: PathBuf, source_image: ImageId, uri: &str, policy: SlotPolicy) -> Self {
        Self {
            source,
            source_image,
            uri: uri.to_string(),
            policy,
            textures: Vec::new(),
            keep_extension: false,
        }
    }

    fn stem(&self) -> PathBuf {
        if self.keep_extension {
            self.source.clone()
        } else {
            self.source.with_extension("")
        }
    }

    pub fn output(&self) -> PathBuf {
        with_suffix(&self.stem(), ".ktx2")
    }

    pub fn metallicity_output(&self) -> PathBuf {
        with_suffix(&self.stem(), ".metallicity.ktx2")
    }

    pub fn roughness_output(&self) -> PathBuf {
        with_suffix(&self.stem(), ".roughness.ktx2")
    }

    /// URI of the converted image, relative to the document like the source.
    /// Percent escapes of the source URI are kept.
    pub fn output_uri(&self) -> String {
        let stem = if self.keep_extension {
            self.uri.as_str()
        } else {
            strip_extension(&self.uri)
        };
        format!("{stem}.ktx2")
    }
}

/// Files touched by a successful conversion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversionOutcome {
    pub written: Vec<PathBuf>,
    /// Outputs that already existed and were kept.
    pub reused: Vec<PathBuf>,
    /// Split channels that were not written because every texel is the same.
    pub redundant: Vec<PathBuf>,
}

pub struct TextureConverter {
    replace_compressed: bool,
    split_metal_rough: bool,
    encoder: Arc<dyn BlockEncoder>,
}

impl TextureConverter {
    pub fn new(options: &Options, encoder: Arc<dyn BlockEncoder>) -> Self {
        Self {
            replace_compressed: options.replace_compressed_textures,
            split_metal_rough: options.split_metal_rough_textures,
            encoder,
        }
    }

    fn existing(&self, path: &Path) -> bool {
        !self.replace_compressed && path.exists()
    }

    pub fn convert(&self, job: &ConversionJob) -> Result<ConversionOutcome, ConvertError> {
        let mut outcome = ConversionOutcome::default();
        let mut raster = None;

        if job.policy.is_split_channel && self.split_metal_rough {
            self.split(job, &mut raster, &mut outcome)?;
        }

        let output = job.output();
        if self.existing(&output) {
            info!("Using existing found texture '{}'", output.display());
            outcome.reused.push(output);
        } else {
            let raster = match raster {
                Some(raster) => raster,
                None => Raster::load(&job.source)?,
            };
            self.write_ktx(raster, job.policy.is_color_data, job.policy.is_normal_map, &output)?;
            outcome.written.push(output);
        }
        Ok(outcome)
    }

    fn split(
        &self,
        job: &ConversionJob,
        raster: &mut Option<Raster>,
        outcome: &mut ConversionOutcome,
    ) -> Result<(), ConvertError> {
        let metallicity = job.metallicity_output();
        let roughness = job.roughness_output();
        let metallicity_found = self.existing(&metallicity);
        let roughness_found = self.existing(&roughness);
        if metallicity_found && roughness_found {
            info!(
                "Using existing metallicity and roughness textures '{}, {}'",
                metallicity.display(),
                roughness.display()
            );
            outcome.reused.extend([metallicity, roughness]);
            return Ok(());
        }

        info!("Splitting texture: {}", job.source.display());
        let source = raster.insert(Raster::load(&job.source)?);
        let (metal_channel, rough_channel) = match source.channels {
            2 => (0, 1),
            3 | 4 => (2, 1),
            channels => {
                return Err(ConvertError::ChannelCount {
                    path: job.source.clone(),
                    channels,
                });
            }
        };

        for (label, channel, output, found) in [
            ("metallicity", metal_channel, metallicity, metallicity_found),
            ("roughness", rough_channel, roughness, roughness_found),
        ] {
            let split = source.extract_channel(channel)?;
            if split.is_uniform() {
                warn!(
                    "Skipping output of redundant split {label} texture '{}'",
                    job.source.display()
                );
                outcome.redundant.push(output);
            } else if found {
                info!("Using existing found {label} texture '{}'", output.display());
                outcome.reused.push(output);
            } else {
                self.write_ktx(split, false, false, &output)?;
                outcome.written.push(output);
            }
        }
        Ok(())
    }

    fn write_ktx(&self, raster: Raster, srgb: bool, normal_map: bool, path: &Path) -> Result<(), ConvertError> {
        let mut raster = raster;
        if raster.bits_per_channel() != 8 {
            warn!("Converting image to 8bit '{}'", path.display());
            raster = raster.to_8bit()?;
        }
        let normalise = normal_map && raster.channels >= 3;
        if normalise {
            info!("Normalising image data '{}'", path.display());
            raster = raster.renormalize()?;
        }

        info!("Writing compressed texture: {}", path.display());
        let format = self
            .encoder
            .format(raster.channels, srgb)
            .ok_or_else(|| ConvertError::Format {
                path: path.to_path_buf(),
                channels: raster.channels,
            })?;
        let levels = mip_levels(raster.width, raster.height);
        debug!(
            "{} levels of {:?} for '{}' with {} encoder",
            levels,
            format,
            path.display(),
            self.encoder.name()
        );

        let mut texture =
            Ktx2Texture::new(format, raster.width, raster.height).with_supercompression(self.encoder.supercompression());
        texture.push_level(self.encoder.encode(&raster, normal_map)?);
        for level in 1..levels {
            let (width, height) = mip_size(raster.width, raster.height, level);
            let mut mip = raster.resized(width, height, srgb).map_err(|err| match err {
                ConvertError::OutOfMemory(err) => ConvertError::OutOfMemory(err),
                _ => ConvertError::Mip {
                    path: path.to_path_buf(),
                    level,
                },
            })?;
            if normalise {
                mip = mip.renormalize()?;
            }
            texture.push_level(self.encoder.encode(&mip, normal_map)?);
        }

        texture.write_to(path).map_err(|source| ConvertError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Collects the textures of every material slot that need converting, one
/// job per source file. Every visited texture is marked as converted so a
/// later pass over the same graph does not plan it again.
pub fn plan(store: &mut EntityStore, options: &Options) -> Vec<ConversionJob> {
    let Some(root) = store.asset_root().map(Path::to_path_buf) else {
        warn!("No asset folder known, textures are left as they are");
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for (_, material) in store.materials() {
        material.for_each_slot(|kind, policy, texture| candidates.push((kind, policy, texture)));
    }

    let mut jobs: Vec<ConversionJob> = Vec::new();
    let mut by_output: HashMap<PathBuf, usize> = HashMap::new();
    // Output path to the source it was claimed by, including skipped ones
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    for (kind, policy, id) in candidates {
        let Some(texture) = store.texture_mut(id) else {
            continue;
        };
        if texture.converted {
            continue;
        }
        texture.converted = true;
        let (compressed, source) = (texture.compressed, texture.source);

        // Compressed-only textures have nothing left to convert
        let Some(source) = source else {
            continue;
        };
        let Some(image) = store.image(source) else {
            continue;
        };
        let Some(uri) = image.file_uri() else {
            debug!("Texture {id} ({kind:?}) samples an embedded image, skipping");
            continue;
        };
        if image.is_ktx2() {
            continue;
        }

        let mut job = ConversionJob::new(resolve_uri(&root, uri), source, uri, policy);
        job.textures.push(id);
        let taken = |job: &ConversionJob| claimed.get(&job.output()).is_some_and(|owner| *owner != job.source);
        if taken(&job) {
            job.keep_extension = true;
            if taken(&job) {
                warn!(
                    "Output '{}' of '{}' is taken by another texture, skipping",
                    job.output().display(),
                    job.source.display()
                );
                continue;
            }
            info!(
                "'{}' shares its name with another texture, writing '{}'",
                job.source.display(),
                job.output().display()
            );
        }
        let output = job.output();
        claimed.insert(output.clone(), job.source.clone());

        if compressed.is_some() && !options.replace_compressed_textures && output.exists() {
            debug!("Texture {id} already has '{}', skipping", output.display());
            continue;
        }

        match by_output.get(&output) {
            Some(&index) => jobs[index].textures.push(id),
            None => {
                debug!("Planned {kind:?} conversion of '{}'", job.source.display());
                by_output.insert(output, jobs.len());
                jobs.push(job);
            }
        }
    }
    jobs
}

/// Points every texture of a successful job at the converted file.
///
/// Textures that already have a compressed image keep it with its URI
/// updated. Otherwise the source image is either kept next to a new image
/// record, or turned into the compressed image with its file deleted. The
/// latter only happens if no texture outside the job still samples it.
pub fn apply(store: &mut EntityStore, job: &ConversionJob, options: &Options) {
    let uri = job.output_uri();
    let shared = store
        .textures()
        .any(|(id, texture)| !job.textures.contains(&id) && texture.image_refs().any(|image| image == job.source_image));
    let keep_source = options.keep_original_textures || shared;
    if shared && !options.keep_original_textures {
        debug!("'{}' is still used elsewhere, keeping it", job.source.display());
    }

    let mut synthesized: Option<ImageId> = None;
    let mut replaced = false;
    for &id in &job.textures {
        let Some(texture) = store.texture(id) else {
            continue;
        };
        if let Some(compressed) = texture.compressed {
            if let Some(image) = store.image_mut(compressed) {
                image.uri = Some(uri.clone());
                image.mime_type = Some(KTX2_MIME_TYPE.to_string());
            }
            continue;
        }

        let image = if keep_source {
            match synthesized {
                Some(image) => image,
                None => {
                    let name = store.image(job.source_image).map(|source| {
                        let base = source.name.as_deref().or(source.uri.as_deref()).unwrap_or_default();
                        format!("{base}/basisu")
                    });
                    let image = store.push_image(Image {
                        name,
                        uri: Some(uri.clone()),
                        mime_type: Some(KTX2_MIME_TYPE.to_string()),
                        ..Default::default()
                    });
                    *synthesized.insert(image)
                }
            }
        } else {
            if !replaced {
                if let Some(image) = store.image_mut(job.source_image) {
                    image.uri = Some(uri.clone());
                    image.mime_type = Some(KTX2_MIME_TYPE.to_string());
                }
                warn!("Removing old texture: {}", job.source.display());
                if let Err(err) = std::fs::remove_file(&job.source) {
                    warn!("Failed to remove '{}': {err}", job.source.display());
                }
                replaced = true;
            }
            job.source_image
        };

        if let Some(texture) = store.texture_mut(id) {
            if !keep_source && texture.source == Some(job.source_image) {
                texture.source = None;
            }
            texture.compressed = Some(image);
        }
    }
}
