//! The optimisation pass: prune the graph, convert textures, write it back.

use std::{num::NonZeroUsize, path::Path, sync::Arc};

use anyhow::Context;
use log::{error, info, warn};

use crate::{
    convert::{self, TextureConverter},
    data_structures::store::EntityStore,
    prune::{PruneReport, PruningEngine},
    resources::{
        document::Document,
        ktx2::{BlockEncoder, Uncompressed},
    },
    scheduler::{ConversionScheduler, TextureReport},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Keep the source image of a converted texture as its fallback.
    pub keep_original_textures: bool,
    /// Convert again even if a texture already has its KTX2 file.
    pub replace_compressed_textures: bool,
    /// Also write metallic and roughness as separate single channel files.
    pub split_metal_rough_textures: bool,
    pub worker_threads: usize,
    pub convert_textures: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            keep_original_textures: false,
            replace_compressed_textures: false,
            split_metal_rough_textures: false,
            worker_threads: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            convert_textures: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PassReport {
    pub prune: PruneReport,
    pub textures: TextureReport,
}

pub fn generator() -> String {
    format!("{} ({})", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

pub struct Optimiser {
    options: Options,
    encoder: Arc<dyn BlockEncoder>,
}

impl Optimiser {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            encoder: Arc::new(Uncompressed),
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn BlockEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Optimises the document at `input` and writes the result to `output`,
    /// which may be the same file.
    pub fn pass(&self, input: &Path, output: &Path) -> anyhow::Result<PassReport> {
        info!("Opening input gltf file: {}", input.display());
        let mut document =
            Document::load(input).with_context(|| format!("Failed to parse input file '{}'", input.display()))?;
        let mut store = document.take_entities().context("Invalid input file detected")?;

        let report = self.optimise(&mut store)?;

        info!("Writing output gltf file: {}", output.display());
        document.set_generator(&generator());
        document.put_entities(&store).context("Invalid output file detected")?;
        document.save(output)?;
        Ok(report)
    }

    /// Runs the invalid, unused and duplicate sweeps, then the texture pass.
    pub fn optimise(&self, store: &mut EntityStore) -> anyhow::Result<PassReport> {
        let prune = PruningEngine::new(store).run().context("Failed pruning the scene graph")?;
        let textures = if self.options.convert_textures {
            self.pass_textures(store)?
        } else {
            TextureReport::default()
        };
        Ok(PassReport { prune, textures })
    }

    /// Converts every texture reachable from a material. Failures are logged
    /// and leave their texture as it was. The graph only points at the new
    /// files if the encoder writes Basis Universal data.
    pub fn pass_textures(&self, store: &mut EntityStore) -> anyhow::Result<TextureReport> {
        let jobs = convert::plan(store, &self.options);
        let mut report = TextureReport {
            planned: jobs.len(),
            ..Default::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }

        let scheduler =
            ConversionScheduler::new(self.options.worker_threads).context("Failed to start conversion workers")?;
        info!("Converting {} textures on {} workers", jobs.len(), scheduler.workers());
        let linked = self.encoder.is_basis();
        if !linked {
            warn!(
                "The {} encoder does not produce Basis Universal data, KTX2 files are written next to their \
                 sources but the document keeps the original images",
                self.encoder.name()
            );
        }
        let converter = Arc::new(TextureConverter::new(&self.options, Arc::clone(&self.encoder)));

        for (job, result) in scheduler.run(converter, jobs) {
            match result {
                Ok(outcome) => {
                    if linked {
                        convert::apply(store, &job, &self.options);
                    }
                    report.record(&outcome);
                }
                Err(err) => {
                    error!("{:#}", anyhow::Error::new(err));
                    report.failed += 1;
                }
            }
        }
        info!(
            "Converted {} of {} textures ({} failed)",
            report.converted, report.planned, report.failed
        );
        Ok(report)
    }
}
