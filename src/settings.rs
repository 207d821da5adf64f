use std::path::{Path, PathBuf};

use clap::Parser;
use gltf_squash::optimiser::Options;

#[derive(Parser, Debug)]
#[command(name = "gltf-squash")]
#[command(version)]
#[command(about = "GLTF file optimiser")]
pub struct CliArgs {
    #[arg(short, long, env = "GLTF_SQUASH_INPUT", help = "The input GLTF file")]
    pub input: PathBuf,

    #[arg(short, long, help = "The output GLTF file [default: the input file]")]
    pub output: Option<PathBuf>,

    #[arg(long, alias = "kt", help = "Keep original uncompressed textures")]
    pub keep_uncompressed_textures: bool,

    #[arg(long, help = "Re-encode textures even if their KTX2 file already exists")]
    pub replace_compressed_textures: bool,

    #[arg(long, help = "Also write metallic and roughness as separate textures")]
    pub split_metal_rough_textures: bool,

    #[arg(short, long, help = "Number of texture conversion workers [default: available cores]")]
    pub jobs: Option<usize>,

    #[arg(long, help = "Only prune the scene graph, leave textures untouched")]
    pub skip_textures: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    pub fn output(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.input)
    }

    pub fn options(&self) -> Options {
        let defaults = Options::default();
        Options {
            keep_original_textures: self.keep_uncompressed_textures,
            replace_compressed_textures: self.replace_compressed_textures,
            split_metal_rough_textures: self.split_metal_rough_textures,
            worker_threads: self.jobs.unwrap_or(defaults.worker_threads),
            convert_textures: !self.skip_textures,
        }
    }
}
