// src/geometry/mod.rs

//! Level-set geometry of the (possibly moving) physical domain.
//!
//! The domain is `{x : phi(x, t) < 0}`. [`GeometryState`] samples `phi` on a
//! sub-lattice of every mesh cell and classifies each cell against it; the
//! [`quadrature`] module integrates over the same piecewise-linear picture.

pub mod quadrature;

use log::debug;

use crate::fields::{Field, TimeFunction};
use crate::kernel::{Point, Tensor1};
use crate::meshing::{FaceDirection, Mesh};
use crate::{EngineError, EngineResult};

pub use quadrature::{QuadratureRule, QuadratureService, SubdivisionQuadrature, SurfaceRule};

/// Position of a cell relative to the domain boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Inside,
    Outside,
    Cut,
}

/// Level set, its time and the per-cell classification derived from it.
pub struct GeometryState {
    mesh: Mesh,
    level_set: TimeFunction<f64>,
    moving: bool,
    subdivisions: usize,
    time: f64,
    sampled_at: Option<f64>,
    samples: Vec<f64>,
    locations: Vec<Location>,
}

impl GeometryState {
    /// Builds the state and classifies the mesh at `t = 0`.
    ///
    /// A stationary domain (`moving == false`) keeps the level set frozen at
    /// `t = 0` whatever time is set later.
    pub fn new(
        mesh: Mesh,
        level_set: impl Field<f64> + 'static,
        moving: bool,
        subdivisions: usize,
    ) -> EngineResult<Self> {
        if subdivisions == 0 {
            return Err(EngineError::Config("level-set sampling needs at least one subdivision per cell".into()));
        }
        let mut state = GeometryState {
            mesh,
            level_set: TimeFunction::new(level_set),
            moving,
            subdivisions,
            time: 0.0,
            sampled_at: None,
            samples: Vec::new(),
            locations: Vec::new(),
        };
        state.set_time(0.0);
        Ok(state)
    }

    /// Moves the level set to time `t` and reclassifies every cell.
    ///
    /// Does nothing beyond recording `t` when the sampled level set would not
    /// change (stationary domain, or same time as before).
    pub fn set_time(&mut self, t: f64) {
        self.time = t;
        let effective = if self.moving { t } else { 0.0 };
        if self.sampled_at == Some(effective) {
            return;
        }
        self.level_set.set_time(effective);
        self.resample();
        self.sampled_at = Some(effective);

        let (mut inside, mut cut) = (0, 0);
        for loc in &self.locations {
            match loc {
                Location::Inside => inside += 1,
                Location::Cut => cut += 1,
                Location::Outside => {}
            }
        }
        debug!(
            "level set sampled at t = {:.6}: {} inside, {} cut, {} outside cells",
            effective,
            inside,
            cut,
            self.locations.len() - inside - cut
        );
    }

    fn resample(&mut self) {
        let m = self.subdivisions;
        let (sx, sy) = (m * self.mesh.nx + 1, m * self.mesh.ny + 1);
        let (hx, hy) = (self.mesh.hx() / m as f64, self.mesh.hy() / m as f64);
        let (x0, y0) = (self.mesh.lower[0], self.mesh.lower[1]);

        self.samples = (0..sx * sy)
            .map(|node| {
                let (gx, gy) = (node % sx, node / sx);
                let p = Point::new(x0 + gx as f64 * hx, y0 + gy as f64 * hy);
                self.level_set.value(&p)
            })
            .collect();

        self.locations = (0..self.mesh.n_cells()).map(|cell| self.locate(cell)).collect();
    }

    fn locate(&self, cell: usize) -> Location {
        let m = self.subdivisions;
        let mut negative = 0;
        for j in 0..=m {
            for i in 0..=m {
                if self.sample(cell, i, j) < 0.0 {
                    negative += 1;
                }
            }
        }
        match negative {
            0 => Location::Outside,
            n if n == (m + 1) * (m + 1) => Location::Inside,
            _ => Location::Cut,
        }
    }

    /// Classification of `cell` at the most recently set time.
    #[inline]
    pub fn classify(&self, cell: usize) -> Location {
        self.locations[cell]
    }

    pub fn is_active(&self, cell: usize) -> bool {
        self.classify(cell) != Location::Outside
    }

    /// Cells carrying degrees of freedom, in index order.
    pub fn active_cells(&self) -> Vec<usize> {
        (0..self.mesh.n_cells()).filter(|&c| self.is_active(c)).collect()
    }

    /// Level-set value at sub-lattice node `(i, j)` of `cell`, `0 <= i, j <= subdivisions`.
    #[inline]
    pub fn sample(&self, cell: usize, i: usize, j: usize) -> f64 {
        let m = self.subdivisions;
        let (ix, iy) = self.mesh.cell_coords(cell);
        let stride = m * self.mesh.nx + 1;
        self.samples[(m * ix + i) + stride * (m * iy + j)]
    }

    /// Level-set samples along face `dir` of `cell`, ordered by increasing coordinate.
    pub fn face_samples(&self, cell: usize, dir: FaceDirection) -> Vec<f64> {
        let m = self.subdivisions;
        (0..=m)
            .map(|s| match dir {
                FaceDirection::West => self.sample(cell, 0, s),
                FaceDirection::East => self.sample(cell, m, s),
                FaceDirection::South => self.sample(cell, s, 0),
                FaceDirection::North => self.sample(cell, s, m),
            })
            .collect()
    }

    /// Whether part of face `dir` of `cell` lies in the domain.
    pub fn face_touches_domain(&self, cell: usize, dir: FaceDirection) -> bool {
        self.face_samples(cell, dir).iter().any(|&v| v < 0.0)
    }

    pub fn level_set_value(&self, p: &Point) -> f64 {
        self.level_set.value(p)
    }

    pub fn level_set_gradient(&self, p: &Point) -> Tensor1 {
        self.level_set.gradient(p)
    }

    /// Last time passed to [`GeometryState::set_time`].
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn subdivisions(&self) -> usize {
        self.subdivisions
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }
}

impl std::fmt::Debug for GeometryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryState")
            .field("mesh", &self.mesh)
            .field("moving", &self.moving)
            .field("subdivisions", &self.subdivisions)
            .field("time", &self.time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::analytic::{Circle, MovingCircle};

    fn disc_geometry() -> GeometryState {
        let mesh = Mesh::rectangle([-1.25, -1.25], [1.25, 1.25], 8, 8).unwrap();
        GeometryState::new(mesh, Circle::interior(Point::origin(), 1.0), false, 4).unwrap()
    }

    #[test]
    fn test_classification_is_total_and_consistent() {
        let geometry = disc_geometry();
        let mesh = geometry.mesh().clone();
        for cell in 0..mesh.n_cells() {
            let g = mesh.cell_geometry(cell);
            let centre = Point::new(g.origin.x + 0.5 * g.hx, g.origin.y + 0.5 * g.hy);
            match geometry.classify(cell) {
                Location::Inside => assert!(centre.coords.norm() < 1.0),
                Location::Outside => assert!(centre.coords.norm() > 1.0),
                Location::Cut => {}
            }
        }
        // The four central cells are well inside, the corners well outside.
        assert_eq!(geometry.classify(mesh.cell_index(3, 3)), Location::Inside);
        assert_eq!(geometry.classify(mesh.cell_index(0, 0)), Location::Outside);
        assert_eq!(geometry.classify(mesh.cell_index(0, 3)), Location::Cut);
    }

    #[test]
    fn test_stationary_domain_ignores_time() {
        let mut geometry = disc_geometry();
        let before = geometry.locations().to_vec();
        geometry.set_time(0.75);
        assert_eq!(geometry.time(), 0.75);
        assert_eq!(geometry.locations(), &before[..]);
        // Repeated queries at the same time are idempotent.
        geometry.set_time(0.75);
        assert_eq!(geometry.locations(), &before[..]);
    }

    #[test]
    fn test_moving_circle_only_changes_cells_along_its_path() {
        let mesh = Mesh::channel(2.0, 1.0, 3).unwrap();
        let obstacle = MovingCircle { radius: 0.25, half_length: 2.0, channel_radius: 1.0, path_duration: 1.0 };
        let mut geometry = GeometryState::new(mesh.clone(), obstacle, true, 4).unwrap();
        let initial = geometry.locations().to_vec();

        let tau = 0.125;
        let mut ever_changed = vec![false; mesh.n_cells()];
        let mut previous = initial.clone();
        for step in 1..=8 {
            geometry.set_time(step as f64 * tau);
            let current = geometry.locations().to_vec();
            assert_ne!(current, previous, "the obstacle moved between steps");
            for cell in 0..mesh.n_cells() {
                if current[cell] != initial[cell] {
                    ever_changed[cell] = true;
                }
            }
            previous = current;
        }

        // Cells in the upper-left and lower-right corners are never swept.
        for &(ix, iy) in &[(0, mesh.ny - 1), (mesh.nx - 1, 0)] {
            let cell = mesh.cell_index(ix, iy);
            assert!(!ever_changed[cell]);
            assert_eq!(geometry.classify(cell), Location::Inside);
        }
        assert!(ever_changed.iter().any(|&c| c));
    }

    #[test]
    fn test_rejects_zero_subdivisions() {
        let mesh = Mesh::rectangle([0.0, 0.0], [1.0, 1.0], 1, 1).unwrap();
        assert!(GeometryState::new(mesh, Circle::interior(Point::origin(), 0.5), false, 0).is_err());
    }
}
