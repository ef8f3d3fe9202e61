// src/meshing/mod.rs

//! Structured background mesh for the unfitted discretization.
//!
//! The physical domain is never meshed: a rectangular channel is covered by
//! axis-aligned quadrilaterals and the level set decides which of them carry
//! degrees of freedom (see [`dofs::DofHandler`]).

pub mod dofs;

use crate::config::MAX_REFINES;
use crate::kernel::{Point, Tensor1};
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

pub use dofs::DofHandler;

/// Boundary indicator of an outer mesh face.
pub type BoundaryId = u8;

/// Channel walls at `y = ±radius`.
pub const WALL_ID: BoundaryId = 0;
/// Left end of the channel, `x = -half_length`.
pub const INLET_ID: BoundaryId = 1;
/// Right end of the channel, `x = +half_length`.
pub const OUTLET_ID: BoundaryId = 2;

/// The four faces of a quadrilateral cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceDirection {
    West,
    East,
    South,
    North,
}

impl FaceDirection {
    pub const ALL: [FaceDirection; 4] = [
        FaceDirection::West,
        FaceDirection::East,
        FaceDirection::South,
        FaceDirection::North,
    ];

    /// Coordinate axis the face normal is aligned with (0 = x, 1 = y).
    pub fn axis(self) -> usize {
        match self {
            FaceDirection::West | FaceDirection::East => 0,
            FaceDirection::South | FaceDirection::North => 1,
        }
    }

    pub fn outward_normal(self) -> Tensor1 {
        match self {
            FaceDirection::West => Tensor1::new(-1.0, 0.0),
            FaceDirection::East => Tensor1::new(1.0, 0.0),
            FaceDirection::South => Tensor1::new(0.0, -1.0),
            FaceDirection::North => Tensor1::new(0.0, 1.0),
        }
    }
}

/// Geometry of a single axis-aligned cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGeometry {
    /// Lower-left corner.
    pub origin: Point,
    pub hx: f64,
    pub hy: f64,
}

impl CellGeometry {
    /// Reference coordinates in [0, 1]^2 of the physical point `p`.
    #[inline]
    pub fn to_reference(&self, p: &Point) -> (f64, f64) {
        ((p.x - self.origin.x) / self.hx, (p.y - self.origin.y) / self.hy)
    }

    /// Physical position of lattice node `(i, j)` of a degree-`degree` cell lattice.
    pub fn lattice_point(&self, (i, j): (usize, usize), degree: usize) -> Point {
        let k = degree.max(1) as f64;
        Point::new(
            self.origin.x + self.hx * i as f64 / k,
            self.origin.y + self.hy * j as f64 / k,
        )
    }

    pub fn area(&self) -> f64 {
        self.hx * self.hy
    }

    /// End points of the face in direction `dir`, ordered by increasing coordinate.
    pub fn face_endpoints(&self, dir: FaceDirection) -> (Point, Point) {
        let (x0, y0) = (self.origin.x, self.origin.y);
        let (x1, y1) = (x0 + self.hx, y0 + self.hy);
        match dir {
            FaceDirection::West => (Point::new(x0, y0), Point::new(x0, y1)),
            FaceDirection::East => (Point::new(x1, y0), Point::new(x1, y1)),
            FaceDirection::South => (Point::new(x0, y0), Point::new(x1, y0)),
            FaceDirection::North => (Point::new(x0, y1), Point::new(x1, y1)),
        }
    }
}

/// A face of a cell lying on the outer mesh boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryFace {
    pub direction: FaceDirection,
    pub boundary_id: BoundaryId,
    pub start: Point,
    pub end: Point,
    pub normal: Tensor1,
}

/// Uniform quadrilateral mesh of an axis-aligned rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub lower: [f64; 2],
    pub upper: [f64; 2],
    pub nx: usize,
    pub ny: usize,
}

impl Mesh {
    /// Uniform `nx` by `ny` mesh of the rectangle `[lower, upper]`.
    pub fn rectangle(lower: [f64; 2], upper: [f64; 2], nx: usize, ny: usize) -> EngineResult<Self> {
        if nx == 0 || ny == 0 {
            return Err(EngineError::Config(format!("mesh needs at least one cell per direction, got {}x{}", nx, ny)));
        }
        if !(upper[0] > lower[0] && upper[1] > lower[1]) {
            return Err(EngineError::Config(format!("degenerate mesh box {:?} -> {:?}", lower, upper)));
        }
        Ok(Mesh { lower, upper, nx, ny })
    }

    /// The 2D channel `[-half_length, half_length] x [-radius, radius]`.
    ///
    /// The coarse mesh uses one cell across the channel and as many cells along
    /// it as keep them close to square; it is then refined `n_refines` times.
    pub fn channel(half_length: f64, radius: f64, n_refines: u32) -> EngineResult<Self> {
        if half_length <= 0.0 || radius <= 0.0 {
            return Err(EngineError::Config(format!(
                "channel dimensions must be positive (half_length = {}, radius = {})",
                half_length, radius
            )));
        }
        if n_refines > MAX_REFINES {
            return Err(EngineError::Config(format!(
                "n_refines must be at most {}, got {}",
                MAX_REFINES, n_refines
            )));
        }
        let base_x = (half_length / radius).round().max(1.0) as usize;
        let factor = 1usize << n_refines;
        let nx = base_x
            .checked_mul(factor)
            .ok_or_else(|| EngineError::Config(format!("channel too long for {} refinements", n_refines)))?;
        Mesh::rectangle([-half_length, -radius], [half_length, radius], nx, factor)
    }

    pub fn hx(&self) -> f64 {
        (self.upper[0] - self.lower[0]) / self.nx as f64
    }

    pub fn hy(&self) -> f64 {
        (self.upper[1] - self.lower[1]) / self.ny as f64
    }

    /// Mesh size: the longest cell side.
    pub fn h(&self) -> f64 {
        self.hx().max(self.hy())
    }

    pub fn n_cells(&self) -> usize {
        self.nx * self.ny
    }

    #[inline]
    pub fn cell_index(&self, ix: usize, iy: usize) -> usize {
        ix + self.nx * iy
    }

    #[inline]
    pub fn cell_coords(&self, cell: usize) -> (usize, usize) {
        (cell % self.nx, cell / self.nx)
    }

    pub fn cell_geometry(&self, cell: usize) -> CellGeometry {
        let (ix, iy) = self.cell_coords(cell);
        let (hx, hy) = (self.hx(), self.hy());
        CellGeometry {
            origin: Point::new(self.lower[0] + ix as f64 * hx, self.lower[1] + iy as f64 * hy),
            hx,
            hy,
        }
    }

    /// The cell sharing face `dir` with `cell`, if that face is interior.
    pub fn neighbor(&self, cell: usize, dir: FaceDirection) -> Option<usize> {
        let (ix, iy) = self.cell_coords(cell);
        match dir {
            FaceDirection::West if ix > 0 => Some(self.cell_index(ix - 1, iy)),
            FaceDirection::East if ix + 1 < self.nx => Some(self.cell_index(ix + 1, iy)),
            FaceDirection::South if iy > 0 => Some(self.cell_index(ix, iy - 1)),
            FaceDirection::North if iy + 1 < self.ny => Some(self.cell_index(ix, iy + 1)),
            _ => None,
        }
    }

    /// Faces of `cell` on the outer boundary, tagged with their boundary id.
    pub fn boundary_faces(&self, cell: usize) -> Vec<BoundaryFace> {
        let geometry = self.cell_geometry(cell);
        FaceDirection::ALL
            .iter()
            .filter(|&&dir| self.neighbor(cell, dir).is_none())
            .map(|&dir| {
                let (start, end) = geometry.face_endpoints(dir);
                let boundary_id = match dir {
                    FaceDirection::West => INLET_ID,
                    FaceDirection::East => OUTLET_ID,
                    FaceDirection::South | FaceDirection::North => WALL_ID,
                };
                BoundaryFace { direction: dir, boundary_id, start, end, normal: dir.outward_normal() }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_channel_mesh_has_square_cells() {
        let mesh = Mesh::channel(0.41, 0.205, 3).unwrap();
        assert_eq!(mesh.nx, 16);
        assert_eq!(mesh.ny, 8);
        assert_relative_eq!(mesh.hx(), mesh.hy(), epsilon = 1e-14);
        assert_relative_eq!(mesh.h(), 0.05125, epsilon = 1e-14);
    }

    #[test]
    fn test_rejects_degenerate_dimensions() {
        assert!(Mesh::channel(0.0, 1.0, 2).is_err());
        assert!(Mesh::rectangle([0.0, 0.0], [1.0, 1.0], 0, 3).is_err());
    }

    #[test]
    fn test_rejects_refinement_beyond_shift_width() {
        for n_refines in [MAX_REFINES + 1, 64, u32::MAX] {
            assert!(matches!(Mesh::channel(0.41, 0.205, n_refines), Err(EngineError::Config(_))));
        }
    }

    #[test]
    fn test_neighbors_and_boundary_ids() {
        let mesh = Mesh::rectangle([0.0, 0.0], [2.0, 1.0], 2, 1).unwrap();
        assert_eq!(mesh.neighbor(0, FaceDirection::East), Some(1));
        assert_eq!(mesh.neighbor(1, FaceDirection::West), Some(0));
        assert_eq!(mesh.neighbor(0, FaceDirection::North), None);

        let faces = mesh.boundary_faces(0);
        assert_eq!(faces.len(), 3);
        let inlet = faces.iter().find(|f| f.direction == FaceDirection::West).unwrap();
        assert_eq!(inlet.boundary_id, INLET_ID);
        assert_relative_eq!(inlet.normal.x, -1.0);

        let outlet = mesh.boundary_faces(1).into_iter().find(|f| f.boundary_id == OUTLET_ID).unwrap();
        assert_relative_eq!(outlet.start.x, 2.0);
        assert_relative_eq!(outlet.end.y, 1.0);
    }

    #[test]
    fn test_cell_geometry_reference_map() {
        let mesh = Mesh::rectangle([-1.0, -1.0], [1.0, 1.0], 4, 4).unwrap();
        let cell = mesh.cell_geometry(mesh.cell_index(2, 1));
        assert_relative_eq!(cell.origin.x, 0.0);
        assert_relative_eq!(cell.origin.y, -0.5);
        let (xi, eta) = cell.to_reference(&Point::new(0.25, -0.125));
        assert_relative_eq!(xi, 0.5);
        assert_relative_eq!(eta, 0.75);
    }
}
