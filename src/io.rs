//! # IO
//!
//! Binary persistence with `bincode`: coupling tables and screening matrices cached between runs,
//! and the checkpoints a propagation is resumed from.

use crate::error::IOError;
use crate::propagator::Checkpoint;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Serialises `value` to `path`, creating parent directories as needed
pub fn store<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), IOError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, IOError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

/// Checkpoints are named by step so they sort chronologically
pub fn checkpoint_path(directory: &Path, steps: usize) -> PathBuf {
    directory.join(format!("checkpoint_{steps:010}.bin"))
}

pub fn store_checkpoint(directory: &Path, checkpoint: &Checkpoint) -> Result<PathBuf, IOError> {
    let path = checkpoint_path(directory, checkpoint.steps);
    store(&path, checkpoint)?;
    tracing::info!("Checkpoint at t = {} written to {}", checkpoint.time, path.display());
    Ok(path)
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint, IOError> {
    load(path)
}

/// The most recent checkpoint in `directory`, if any
pub fn latest_checkpoint(directory: &Path) -> Result<Option<PathBuf>, IOError> {
    let pattern = directory.join("checkpoint_*.bin");
    let mut paths = glob::glob(&pattern.to_string_lossy())?.collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths.pop())
}
