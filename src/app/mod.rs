//! The command line application: reads the configuration, assembles the model and propagates it,
//! writing observables and checkpoints to the output directory.
pub mod configuration;
mod error;
mod output;
mod telemetry;

pub use configuration::Configuration;
pub(crate) use error::ApplicationError;

use crate::constants::{ELECTRON_VOLT, FEMTOSECOND};
use crate::io;
use crate::observables::time_average;
use crate::simulation::{assemble, propagate, AssembledModel, Propagation};
use clap::{ArgEnum, Parser};
use console::Term;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct App {
    /// TOML file layered over the default configuration
    file_path: Option<PathBuf>,
    #[clap(arg_enum, short, long, default_value = "info")]
    log_level: LogLevel,
    /// Checkpoint file, or a directory of checkpoints, to resume from
    #[clap(short, long)]
    restart: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ArgEnum)]
enum LogLevel {
    Trace,
    Info,
    Debug,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self {
            LogLevel::Trace => "trace",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Error => "error",
        };
        write!(f, "{level}")
    }
}

pub fn run() -> color_eyre::Result<()> {
    let cli = App::parse();

    let configuration = Configuration::build(cli.file_path.as_deref())?;
    let (subscriber, _guard) =
        telemetry::get_subscriber(cli.log_level, &configuration.output.directory)?;
    telemetry::init_subscriber(subscriber)?;

    let model = assemble(&configuration)?;
    let settings = &configuration.propagation;
    let dt = settings.time_step * FEMTOSECOND;
    let total_time = settings.total_time * FEMTOSECOND;

    let propagation = match &cli.restart {
        Some(path) => {
            let checkpoint = io::load_checkpoint(&resolve_checkpoint(path)?)?;
            Propagation::resume(
                &model,
                &checkpoint,
                total_time,
                dt,
                settings.checkpoint_interval,
            )?
        }
        None => propagate(&model, total_time, dt, settings.checkpoint_interval)?,
    };

    drive(propagation, &model, &configuration, cli.restart.is_some())?;
    Ok(())
}

/// A checkpoint file, or the latest checkpoint in a directory
fn resolve_checkpoint(path: &Path) -> Result<PathBuf, ApplicationError> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }
    io::latest_checkpoint(path)?.ok_or_else(|| ApplicationError::NoCheckpoint(path.to_path_buf()))
}

fn drive(
    propagation: Propagation<'_>,
    model: &AssembledModel,
    configuration: &Configuration,
    append: bool,
) -> Result<(), ApplicationError> {
    let number_of_bands = model.bands.number_of_bands();
    let mut writer = output::ObservablesWriter::create(
        &configuration.output.observables_file(),
        number_of_bands,
        append,
    )?;

    let spinner_style = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{prefix:.bold.dim} {spinner} {msg} [{wide_bar:.cyan/blue}] {percent}% ({eta})");
    let pb = ProgressBar::with_draw_target(
        propagation.total_steps() as u64,
        ProgressDrawTarget::term(Term::stdout(), 60),
    );
    pb.set_style(spinner_style);
    pb.set_message("Propagating");
    pb.set_position(propagation.step() as u64);

    let mut series = Vec::new();
    for snapshot in propagation {
        let snapshot = snapshot?;
        pb.set_position(snapshot.step as u64);
        writer.write(&snapshot)?;
        series.push(snapshot.observables);
    }
    pb.finish_and_clear();
    writer.flush()?;

    if let Some(average) = time_average(&series, configuration.output.integration_rule) {
        tracing::info!(
            "Time averaged: {:.6} electrons, electronic energy {:.6} eV, phonon energy {:.6} eV",
            average.particle_number,
            average.electronic_energy / ELECTRON_VOLT,
            average.phonon_energy / ELECTRON_VOLT,
        );
    }
    if let Some(last) = series.last() {
        tracing::info!(
            "Finished at t = {:.3} fs with band populations {:?}",
            last.time / FEMTOSECOND,
            last.band_populations
        );
    }
    Ok(())
}
