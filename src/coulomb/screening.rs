use nalgebra::DMatrix;
use num_complex::Complex;

/// Dielectric function tabulated on the q-grid (rows) at a list of frequencies (columns)
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScreeningMatrix {
    frequencies: Vec<f64>,
    values: DMatrix<Complex<f64>>,
}

impl ScreeningMatrix {
    /// Assembles the matrix from one row of dielectric values per q-point
    pub(crate) fn from_rows(frequencies: Vec<f64>, rows: Vec<Vec<Complex<f64>>>) -> Self {
        let values = DMatrix::from_fn(rows.len(), frequencies.len(), |q, frequency| {
            rows[q][frequency]
        });
        Self {
            frequencies,
            values,
        }
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn number_of_q_points(&self) -> usize {
        self.values.nrows()
    }

    /// The dielectric function at q-point `q` and the `frequency_index`-th frequency
    pub fn dielectric(&self, q: usize, frequency_index: usize) -> Complex<f64> {
        self.values[(q, frequency_index)]
    }

    pub fn values(&self) -> &DMatrix<Complex<f64>> {
        &self.values
    }
}
