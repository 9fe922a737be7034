//! polyscene - play the two-scene engine from the terminal keyboard
//!
//! Run with: cargo run -- [--verbose]
//!
//! Logs go to polyscene.log in the system temp directory, since the
//! terminal belongs to the UI.

mod app;
mod patches;
mod ui;

use std::fs::File;

use color_eyre::eyre::{Result as EyreResult, WrapErr};
use simplelog::{Config, LevelFilter, WriteLogger};

fn init_logging(verbose: bool) -> EyreResult<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let path = std::env::temp_dir().join("polyscene.log");
    let file = File::create(&path)
        .wrap_err_with(|| format!("cannot create log file {}", path.display()))?;
    WriteLogger::init(level, Config::default(), file).wrap_err("failed to initialize logger")?;
    log::info!("polyscene starting (log level: {level:?})");
    Ok(())
}

fn main() -> EyreResult<()> {
    color_eyre::install()?;

    let verbose = std::env::args().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose)?;

    app::run()
}
