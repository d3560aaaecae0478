//! Whitespace separated observables, one row per snapshot, in fs and eV

use crate::constants::{ELECTRON_VOLT, FEMTOSECOND};
use crate::simulation::Snapshot;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

pub(crate) struct ObservablesWriter<W: Write> {
    writer: W,
}

impl ObservablesWriter<BufWriter<File>> {
    /// Opens `path`, appending to an existing file when resuming a run
    pub(crate) fn create(
        path: &Path,
        number_of_bands: usize,
        append: bool,
    ) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let resume = append && path.exists();
        let file = if resume {
            OpenOptions::new().append(true).open(path)?
        } else {
            File::create(path)?
        };
        let mut writer = Self {
            writer: BufWriter::new(file),
        };
        if !resume {
            writer.header(number_of_bands)?;
        }
        Ok(writer)
    }
}

impl<W: Write> ObservablesWriter<W> {
    fn header(&mut self, number_of_bands: usize) -> Result<(), std::io::Error> {
        write!(
            self.writer,
            "# step time_fs particle_number electronic_energy_eV phonon_energy_eV"
        )?;
        for band in 0..number_of_bands {
            write!(self.writer, " population_{band}")?;
        }
        writeln!(self.writer)
    }

    pub(crate) fn write(&mut self, snapshot: &Snapshot) -> Result<(), std::io::Error> {
        let observables = &snapshot.observables;
        write!(
            self.writer,
            "{} {:.6} {:.12e} {:.12e} {:.12e}",
            snapshot.step,
            observables.time / FEMTOSECOND,
            observables.particle_number,
            observables.electronic_energy / ELECTRON_VOLT,
            observables.phonon_energy / ELECTRON_VOLT,
        )?;
        for population in &observables.band_populations {
            write!(self.writer, " {population:.12e}")?;
        }
        writeln!(self.writer)
    }

    pub(crate) fn flush(&mut self) -> Result<(), std::io::Error> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod test {
    use super::ObservablesWriter;
    use crate::observables::Observables;
    use crate::simulation::Snapshot;

    #[test]
    fn rows_follow_the_header() {
        let mut writer = ObservablesWriter { writer: Vec::new() };
        writer.header(2).unwrap();
        writer
            .write(&Snapshot {
                step: 3,
                observables: Observables {
                    time: 0.,
                    particle_number: 1.,
                    electronic_energy: 0.,
                    band_populations: vec![0.75, 0.25],
                    phonon_energy: 0.,
                },
            })
            .unwrap();
        let text = String::from_utf8(writer.writer).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("population_0 population_1"));
        let columns = lines[1].split_whitespace().collect::<Vec<_>>();
        assert_eq!(columns.len(), 7);
        assert_eq!(columns[0], "3");
        assert_eq!(columns[6].parse::<f64>().unwrap(), 0.25);
    }
}
