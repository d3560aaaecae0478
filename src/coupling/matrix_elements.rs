use super::ValleyClassifier;
use num_complex::Complex;
use std::collections::HashMap;

/// A transition of an electron from band `n` at `k` to band `m` at `k' = k - q`, via mode `mode`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Transition {
    pub k: usize,
    pub q: usize,
    pub k_prime: usize,
    pub mode: usize,
    pub m: usize,
    pub n: usize,
}

/// A provider of electron-phonon matrix elements
pub trait MatrixElements: Send + Sync {
    /// The matrix element `g_mn(k, q, λ)` in Hartree
    fn amplitude(&self, transition: Transition) -> Complex<f64>;

    /// Every parameter the amplitudes depend on, recorded with cached tables
    fn parameters(&self) -> Vec<f64>;
}

/// Deformation-potential coupling with separate intravalley and intervalley strengths
///
/// The same strength is used for every mode and band pair. Setting `interband_only` removes the
/// intraband (`m == n`) elements.
#[derive(Clone, Debug)]
pub struct DeformationPotential {
    intravalley: f64,
    intervalley: f64,
    interband_only: bool,
    /// Valley of every k-point, or `None` when the lattice defines no valleys
    valleys: Option<Vec<Option<usize>>>,
}

impl DeformationPotential {
    pub fn new(
        classifier: &ValleyClassifier<'_>,
        number_of_k_points: usize,
        intravalley: f64,
        intervalley: f64,
        interband_only: bool,
    ) -> Self {
        let valleys = classifier.has_valleys().then(|| {
            (0..number_of_k_points)
                .map(|k| classifier.valley_of(k))
                .collect()
        });
        Self {
            intravalley,
            intervalley,
            interband_only,
            valleys,
        }
    }

    /// A single uniform strength on a lattice without valleys
    pub fn uniform(strength: f64, interband_only: bool) -> Self {
        Self {
            intravalley: strength,
            intervalley: strength,
            interband_only,
            valleys: None,
        }
    }

    fn is_intravalley(&self, k: usize, k_prime: usize) -> bool {
        match &self.valleys {
            None => true,
            Some(valleys) => match (valleys[k], valleys[k_prime]) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl MatrixElements for DeformationPotential {
    fn amplitude(&self, transition: Transition) -> Complex<f64> {
        if self.interband_only && transition.m == transition.n {
            return Complex::from(0.);
        }
        if self.is_intravalley(transition.k, transition.k_prime) {
            Complex::from(self.intravalley)
        } else {
            Complex::from(self.intervalley)
        }
    }

    /// The strengths and flag, then the valley of each k-point with `-1` outside every valley
    fn parameters(&self) -> Vec<f64> {
        let mut parameters = vec![
            self.intravalley,
            self.intervalley,
            if self.interband_only { 1. } else { 0. },
        ];
        if let Some(valleys) = &self.valleys {
            parameters.extend(
                valleys
                    .iter()
                    .copied()
                    .map(|valley| valley.map_or(-1., |valley| valley as f64)),
            );
        }
        parameters
    }
}

/// One precomputed matrix element, as stored on disk
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct TabulatedElement {
    pub k: usize,
    pub q: usize,
    pub mode: usize,
    pub m: usize,
    pub n: usize,
    pub amplitude: Complex<f64>,
}

/// Matrix elements read from a precomputed table, zero wherever the table has no entry
#[derive(Clone, Debug, Default)]
pub struct TabulatedMatrixElements {
    elements: HashMap<(usize, usize, usize, usize, usize), Complex<f64>>,
}

impl TabulatedMatrixElements {
    pub fn from_elements(elements: impl IntoIterator<Item = TabulatedElement>) -> Self {
        Self {
            elements: elements
                .into_iter()
                .map(|element| {
                    (
                        (element.k, element.q, element.mode, element.m, element.n),
                        element.amplitude,
                    )
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl MatrixElements for TabulatedMatrixElements {
    fn amplitude(&self, transition: Transition) -> Complex<f64> {
        self.elements
            .get(&(
                transition.k,
                transition.q,
                transition.mode,
                transition.m,
                transition.n,
            ))
            .copied()
            .unwrap_or_else(|| Complex::from(0.))
    }

    /// Every element as `(k, q, mode, m, n, re, im)`, in index order
    fn parameters(&self) -> Vec<f64> {
        let mut elements = self.elements.iter().collect::<Vec<_>>();
        elements.sort_by_key(|(key, _)| **key);
        elements
            .into_iter()
            .flat_map(|(&(k, q, mode, m, n), amplitude)| {
                [
                    k as f64,
                    q as f64,
                    mode as f64,
                    m as f64,
                    n as f64,
                    amplitude.re,
                    amplitude.im,
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::{
        DeformationPotential, MatrixElements, TabulatedElement, TabulatedMatrixElements,
        Transition,
    };
    use crate::coupling::ValleyClassifier;
    use crate::index_map::KIndexMap;
    use dmd_lattice::Lattice;
    use nalgebra::Vector3;
    use num_complex::Complex;

    fn transition(k: usize, k_prime: usize, m: usize, n: usize) -> Transition {
        Transition {
            k,
            q: 0,
            k_prime,
            mode: 0,
            m,
            n,
        }
    }

    #[test]
    fn deformation_potential_distinguishes_valleys() {
        let lattice = Lattice::cubic(4.)
            .unwrap()
            .with_valleys(vec![Vector3::new(0.25, 0., 0.), Vector3::new(0.75, 0., 0.)], 0.3);
        let k_map = KIndexMap::build([4, 1, 1], Vector3::zeros());
        let classifier = ValleyClassifier::new(&lattice, &k_map);
        let potential = DeformationPotential::new(&classifier, k_map.len(), 1., 3., false);
        assert_eq!(potential.amplitude(transition(1, 1, 0, 0)), Complex::new(1., 0.));
        assert_eq!(potential.amplitude(transition(1, 3, 0, 0)), Complex::new(3., 0.));
    }

    #[test]
    fn interband_only_potential_drops_intraband_elements() {
        let potential = DeformationPotential::uniform(0.4, true);
        assert_eq!(potential.amplitude(transition(0, 1, 1, 1)), Complex::new(0., 0.));
        assert_eq!(potential.amplitude(transition(0, 1, 0, 1)), Complex::new(0.4, 0.));
    }

    #[test]
    fn tabulated_elements_default_to_zero() {
        let table = TabulatedMatrixElements::from_elements(vec![TabulatedElement {
            k: 0,
            q: 0,
            mode: 0,
            m: 1,
            n: 0,
            amplitude: Complex::new(0., 2.),
        }]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.amplitude(transition(0, 0, 1, 0)), Complex::new(0., 2.));
        assert_eq!(table.amplitude(transition(0, 0, 0, 1)), Complex::new(0., 0.));
        assert_eq!(table.parameters(), vec![0., 0., 0., 1., 0., 0., 2.]);
    }

    #[test]
    fn parameters_change_with_the_strengths() {
        let weak = DeformationPotential::uniform(0.4, false);
        let strong = DeformationPotential::uniform(0.8, false);
        assert_eq!(weak.parameters(), vec![0.4, 0.4, 0.]);
        assert_ne!(weak.parameters(), strong.parameters());
    }
}
