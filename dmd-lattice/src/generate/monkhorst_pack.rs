use crate::grid::MonkhorstPackGrid;
use crate::primitives::{wrap_fractional, GridPoint};
use nalgebra::Vector3;

/// Creates an unshifted `n1 x n2 x n3` grid containing the Gamma point
pub fn create_gamma_centred_grid(divisions: [usize; 3]) -> MonkhorstPackGrid {
    create_monkhorst_pack_grid(divisions, &Vector3::zeros())
}

/// Creates a uniform grid of `n1 * n2 * n3` points in the first reciprocal cell
///
/// Point `(i1, i2, i3)` sits at fractional coordinate `(i + shift) / n`, wrapped into `[0, 1)`,
/// and is stored at flat position `(i1 * n2 + i2) * n3 + i3`. The `shift` is given in units of
/// one grid spacing so `[0.5, 0.5, 0.5]` reproduces the classic shifted Monkhorst-Pack set.
pub fn create_monkhorst_pack_grid(divisions: [usize; 3], shift: &Vector3<f64>) -> MonkhorstPackGrid {
    if divisions.iter().any(|&n| n == 0) {
        return MonkhorstPackGrid::from_divisions_and_points(divisions, *shift, Vec::new());
    }
    let number_of_points = divisions.iter().product();
    let mut points = Vec::with_capacity(number_of_points);
    for i1 in 0..divisions[0] {
        for i2 in 0..divisions[1] {
            for i3 in 0..divisions[2] {
                let triplet = [i1, i2, i3];
                let fractional = Vector3::from_fn(|axis, _| {
                    (triplet[axis] as f64 + shift[axis]) / divisions[axis] as f64
                });
                points.push(GridPoint::new(triplet, wrap_fractional(&fractional)));
            }
        }
    }
    MonkhorstPackGrid::from_divisions_and_points(divisions, *shift, points)
}

#[cfg(test)]
mod test {
    use super::{create_gamma_centred_grid, create_monkhorst_pack_grid};
    use nalgebra::Vector3;

    #[test]
    fn gamma_centred_grid_has_expected_ordering() {
        let grid = create_gamma_centred_grid([2, 3, 1]);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid.points()[0].triplet(), [0, 0, 0]);
        assert_eq!(grid.points()[1].triplet(), [0, 1, 0]);
        assert_eq!(grid.points()[3].triplet(), [1, 0, 0]);
        approx::assert_relative_eq!(
            *grid.points()[4].fractional(),
            Vector3::new(0.5, 1. / 3., 0.)
        );
    }

    #[test]
    fn empty_divisions_produce_an_empty_grid() {
        let grid = create_monkhorst_pack_grid([0, 4, 4], &Vector3::zeros());
        assert!(grid.is_empty());
    }

    #[test]
    fn shifted_grid_does_not_contain_gamma() {
        let grid = create_monkhorst_pack_grid([2, 2, 2], &Vector3::new(0.5, 0.5, 0.5));
        assert!(grid
            .points()
            .iter()
            .all(|point| !point.coincides_with(&Vector3::zeros())));
    }
}
