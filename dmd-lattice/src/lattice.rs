use crate::primitives::wrap_fractional;
use nalgebra::{Matrix3, Vector3};

/// A Bravais lattice together with the valley positions of its band structure
///
/// The direct lattice vectors are the columns of `direct`, in bohr. The reciprocal vectors are the
/// columns of `reciprocal = 2π (direct⁻¹)ᵀ` so a fractional wavevector `k` has Cartesian
/// coordinates `reciprocal * k`.
#[derive(Clone, Debug)]
pub struct Lattice {
    direct: Matrix3<f64>,
    reciprocal: Matrix3<f64>,
    valleys: Vec<Vector3<f64>>,
    valley_radius: f64,
}

impl Lattice {
    /// Builds the lattice from its direct vectors, returning `None` if they are linearly dependent
    pub fn new(direct: Matrix3<f64>) -> Option<Self> {
        let inverse = direct.try_inverse()?;
        let reciprocal = inverse.transpose() * (2_f64 * std::f64::consts::PI);
        Some(Self {
            direct,
            reciprocal,
            valleys: Vec::new(),
            valley_radius: 0_f64,
        })
    }

    /// A simple cubic lattice of side `a`
    pub fn cubic(a: f64) -> Option<Self> {
        Self::new(Matrix3::from_diagonal_element(a))
    }

    /// Attach valley centres, in fractional coordinates, and the Cartesian radius around each
    /// centre inside which a wavevector is assigned to that valley
    pub fn with_valleys(self, valleys: Vec<Vector3<f64>>, valley_radius: f64) -> Self {
        Self {
            valleys,
            valley_radius,
            ..self
        }
    }

    pub fn direct(&self) -> &Matrix3<f64> {
        &self.direct
    }

    pub fn reciprocal(&self) -> &Matrix3<f64> {
        &self.reciprocal
    }

    pub fn valleys(&self) -> &[Vector3<f64>] {
        &self.valleys
    }

    /// Volume of the unit cell in bohr³
    pub fn unit_cell_volume(&self) -> f64 {
        self.direct.determinant().abs()
    }

    pub fn to_cartesian(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.reciprocal * fractional
    }

    /// The periodic image of `fractional` with the smallest Cartesian norm
    pub fn minimal_image(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        let reduced = wrap_fractional(fractional);
        let mut best = reduced;
        let mut best_norm = self.to_cartesian(&reduced).norm_squared();
        for i in -1..=1 {
            for j in -1..=1 {
                for k in -1..=1 {
                    let candidate = reduced + Vector3::new(i as f64, j as f64, k as f64);
                    let norm = self.to_cartesian(&candidate).norm_squared();
                    if norm < best_norm {
                        best_norm = norm;
                        best = candidate;
                    }
                }
            }
        }
        best
    }

    /// Cartesian length of the shortest periodic image of `fractional`
    pub fn cartesian_norm(&self, fractional: &Vector3<f64>) -> f64 {
        self.to_cartesian(&self.minimal_image(fractional)).norm()
    }

    /// Offset from the nearest valley centre and its squared Cartesian length
    fn nearest_valley(&self, k: &Vector3<f64>) -> Option<(usize, Vector3<f64>, f64)> {
        self.valleys
            .iter()
            .enumerate()
            .map(|(index, centre)| {
                let offset = self.to_cartesian(&self.minimal_image(&(k - centre)));
                (index, offset, offset.norm_squared())
            })
            .min_by(|a, b| a.2.total_cmp(&b.2))
    }

    /// The index of the valley containing `k`, if any
    pub fn valley_of(&self, k: &Vector3<f64>) -> Option<usize> {
        self.nearest_valley(k)
            .filter(|(_, _, distance_squared)| *distance_squared < self.valley_radius.powi(2))
            .map(|(index, _, _)| index)
    }

    /// Whether `k` belongs to the first (K) valley
    pub fn is_k_valley(&self, k: &Vector3<f64>) -> bool {
        self.valley_of(k) == Some(0)
    }

    /// Whether `k1` and `k2` lie in the same valley
    ///
    /// With no valleys attached the whole zone is treated as a single valley
    pub fn is_intravalley(&self, k1: &Vector3<f64>, k2: &Vector3<f64>) -> bool {
        if self.valleys.is_empty() {
            return true;
        }
        match (self.valley_of(k1), self.valley_of(k2)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Lattice;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    fn hexagonal() -> Lattice {
        let a = 4.65;
        let direct = Matrix3::new(
            a,
            -a / 2.,
            0.,
            0.,
            a * 3_f64.sqrt() / 2.,
            0.,
            0.,
            0.,
            20.,
        );
        Lattice::new(direct).unwrap().with_valleys(
            vec![
                Vector3::new(1. / 3., 1. / 3., 0.),
                Vector3::new(-1. / 3., -1. / 3., 0.),
            ],
            0.2,
        )
    }

    #[test]
    fn reciprocal_vectors_are_dual_to_direct_vectors() {
        let lattice = hexagonal();
        let product = lattice.direct().transpose() * lattice.reciprocal();
        assert_relative_eq!(
            product,
            Matrix3::identity() * 2. * std::f64::consts::PI,
            epsilon = 1e-12
        );
    }

    #[test]
    fn singular_lattices_are_rejected() {
        assert!(Lattice::new(Matrix3::zeros()).is_none());
    }

    #[test]
    fn minimal_image_of_near_zone_edge_point_is_negative() {
        let lattice = Lattice::cubic(1.).unwrap();
        let image = lattice.minimal_image(&Vector3::new(0.75, 0., 0.));
        assert_relative_eq!(image, Vector3::new(-0.25, 0., 0.));
    }

    #[test]
    fn valley_classification() {
        let lattice = hexagonal();
        let k = Vector3::new(1. / 3., 1. / 3., 0.);
        let k_prime = Vector3::new(2. / 3., 2. / 3., 0.);
        let gamma = Vector3::zeros();
        assert!(lattice.is_k_valley(&k));
        assert!(!lattice.is_k_valley(&k_prime));
        assert_eq!(lattice.valley_of(&k_prime), Some(1));
        assert_eq!(lattice.valley_of(&gamma), None);
        assert!(lattice.is_intravalley(&k, &(k + Vector3::new(1., 0., 0.))));
        assert!(!lattice.is_intravalley(&k, &k_prime));
    }
}
