use std::process::ExitCode;

use clap::Parser;
use gltf_squash::optimiser::Optimiser;
use log::{error, info};

use crate::settings::CliArgs;

mod settings;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let optimiser = Optimiser::new(args.options());
    match optimiser.pass(&args.input, args.output()) {
        Ok(report) => {
            info!(
                "Done: removed {} entities, converted {} textures",
                report.prune.total(),
                report.textures.converted
            );
            if report.textures.failed > 0 {
                error!("{} textures could not be converted", report.textures.failed);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
