mod app;
mod input;
mod notify;
mod profile_view;

use anyhow::{bail, Context};
use ecoface_core::{EcofaceConfig, FacingMode};
use std::path::PathBuf;

use app::App;

const USAGE: &str = "\
usage: ecoface [verify|register] [video] [front|back] [config=<path>] [name=<n>] [level=<1-3>]

Camera access needs a build with the `opencv` feature:
    cargo build --release --features opencv
Set RUST_LOG=debug for device and request logs.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Verify,
    Register,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    pub mode: Mode,
    pub video: bool,
    pub facing: Option<FacingMode>,
    pub config_file: Option<PathBuf>,
    pub name: Option<String>,
    pub level: Option<i64>,
}

fn parse_args<I, S>(args: I) -> anyhow::Result<Options>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = Options::default();

    for arg in args {
        let arg = arg.as_ref();

        if let Some(value) = arg.strip_prefix("config=") {
            options.config_file = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("name=") {
            options.name = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("level=") {
            options.level = Some(value.parse().with_context(|| format!("bad level '{}'", value))?);
        } else if arg == "verify" {
            options.mode = Mode::Verify;
        } else if arg == "register" {
            options.mode = Mode::Register;
        } else if arg == "video" {
            options.video = true;
        } else if arg == "back" {
            options.facing = Some(FacingMode::Environment);
        } else if arg == "front" {
            options.facing = Some(FacingMode::User);
        } else {
            bail!("unknown argument '{}'\n{}", arg, USAGE);
        }
    }

    Ok(options)
}

fn load_config(options: &Options) -> anyhow::Result<EcofaceConfig> {
    let config = match &options.config_file {
        Some(path) => EcofaceConfig::load(path)?,
        None => EcofaceConfig::discover()?,
    };
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = parse_args(std::env::args().skip(1))?;
    let config = load_config(&options)?;
    log::info!("Using recognition service at {}", config.server.base_url);
    if !ecoface_core::CAMERA_SUPPORT {
        log::warn!("Built without camera support, rebuild with `--features opencv` to capture");
    }

    App::new(config, options).run()
}
