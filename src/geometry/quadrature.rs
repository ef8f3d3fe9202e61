// src/geometry/quadrature.rs

//! Quadrature on cut cells.
//!
//! Every cell is split into `subdivisions x subdivisions` sub-squares matching
//! the level-set samples of [`GeometryState`]. Sub-squares entirely inside the
//! domain get a tensor Gauss rule. Straddling sub-squares are split into two
//! triangles, the level set is taken linear on each of them, and the triangles
//! are clipped against its zero line. The zero line itself is the immersed
//! surface.

use super::{GeometryState, Location};
use crate::kernel::{gauss_box, gauss_segment, gauss_triangle, Point, Tensor1};
use crate::meshing::BoundaryFace;

/// Points and weights over a region of one cell.
#[derive(Debug, Clone, Default)]
pub struct QuadratureRule {
    pub points: Vec<Point>,
    pub weights: Vec<f64>,
}

impl QuadratureRule {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Sum of the weights: area of a bulk region, length of a face region.
    pub fn measure(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Point, f64)> + '_ {
        self.points.iter().zip(self.weights.iter().copied())
    }

    fn extend(&mut self, rule: impl IntoIterator<Item = (Point, f64)>) {
        for (p, w) in rule {
            self.points.push(p);
            self.weights.push(w);
        }
    }
}

/// Quadrature on the immersed boundary, with the outward unit normal at each point.
#[derive(Debug, Clone, Default)]
pub struct SurfaceRule {
    pub points: Vec<Point>,
    pub weights: Vec<f64>,
    pub normals: Vec<Tensor1>,
}

impl SurfaceRule {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn measure(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Point, f64, &Tensor1)> + '_ {
        self.points
            .iter()
            .zip(self.weights.iter().copied())
            .zip(self.normals.iter())
            .map(|((p, w), n)| (p, w, n))
    }
}

/// Quadrature over the parts of a cell that belong to the domain.
pub trait QuadratureService: Send + Sync {
    /// Rule for the part of `cell` inside the domain; empty for outside cells.
    fn inside(&self, geometry: &GeometryState, cell: usize) -> QuadratureRule;

    /// Rule for the immersed boundary crossing `cell`; empty unless the cell is cut.
    fn surface(&self, geometry: &GeometryState, cell: usize) -> SurfaceRule;

    /// Rule for the part of the outer mesh face `face` of `cell` inside the domain.
    fn boundary_face(&self, geometry: &GeometryState, cell: usize, face: &BoundaryFace) -> QuadratureRule;
}

/// Reference [`QuadratureService`] working on the sampled level set.
#[derive(Debug, Clone, Copy)]
pub struct SubdivisionQuadrature {
    n_points: usize,
}

impl Default for SubdivisionQuadrature {
    fn default() -> Self {
        SubdivisionQuadrature { n_points: 4 }
    }
}

impl SubdivisionQuadrature {
    /// `n_points` Gauss points per direction on every sub-region.
    pub fn new(n_points: usize) -> Self {
        SubdivisionQuadrature { n_points: n_points.max(1) }
    }

    /// Corners and level-set values of the two triangles of sub-square `(i, j)`.
    fn sub_triangles(&self, geometry: &GeometryState, cell: usize, i: usize, j: usize) -> [[(Point, f64); 3]; 2] {
        let m = geometry.subdivisions() as f64;
        let g = geometry.mesh().cell_geometry(cell);
        let corner = |a: usize, b: usize| {
            let p = Point::new(g.origin.x + g.hx * a as f64 / m, g.origin.y + g.hy * b as f64 / m);
            (p, geometry.sample(cell, a, b))
        };
        let (p00, p10, p11, p01) = (corner(i, j), corner(i + 1, j), corner(i + 1, j + 1), corner(i, j + 1));
        [[p00, p10, p11], [p00, p11, p01]]
    }
}

impl QuadratureService for SubdivisionQuadrature {
    fn inside(&self, geometry: &GeometryState, cell: usize) -> QuadratureRule {
        let mut rule = QuadratureRule::default();
        let g = geometry.mesh().cell_geometry(cell);
        match geometry.classify(cell) {
            Location::Outside => {}
            Location::Inside => rule.extend(gauss_box(&g.origin, g.hx, g.hy, self.n_points)),
            Location::Cut => {
                let m = geometry.subdivisions();
                let (sx, sy) = (g.hx / m as f64, g.hy / m as f64);
                for j in 0..m {
                    for i in 0..m {
                        let corners = [
                            geometry.sample(cell, i, j),
                            geometry.sample(cell, i + 1, j),
                            geometry.sample(cell, i + 1, j + 1),
                            geometry.sample(cell, i, j + 1),
                        ];
                        let negative = corners.iter().filter(|&&v| v < 0.0).count();
                        if negative == 0 {
                            continue;
                        }
                        if negative == 4 {
                            let origin = Point::new(g.origin.x + i as f64 * sx, g.origin.y + j as f64 * sy);
                            rule.extend(gauss_box(&origin, sx, sy, self.n_points));
                            continue;
                        }
                        for triangle in self.sub_triangles(geometry, cell, i, j).iter() {
                            let polygon = clip_triangle(triangle);
                            for k in 1..polygon.len().saturating_sub(1) {
                                rule.extend(gauss_triangle(&polygon[0], &polygon[k], &polygon[k + 1], self.n_points));
                            }
                        }
                    }
                }
            }
        }
        rule
    }

    fn surface(&self, geometry: &GeometryState, cell: usize) -> SurfaceRule {
        let mut rule = SurfaceRule::default();
        if geometry.classify(cell) != Location::Cut {
            return rule;
        }
        let m = geometry.subdivisions();
        for j in 0..m {
            for i in 0..m {
                for triangle in self.sub_triangles(geometry, cell, i, j).iter() {
                    let Some((a, b)) = zero_segment(triangle) else {
                        continue;
                    };
                    let normal = linear_gradient(triangle);
                    let length = normal.norm();
                    if length == 0.0 {
                        continue;
                    }
                    let normal = normal / length;
                    for (p, w) in gauss_segment(&a, &b, self.n_points) {
                        rule.points.push(p);
                        rule.weights.push(w);
                        rule.normals.push(normal);
                    }
                }
            }
        }
        rule
    }

    fn boundary_face(&self, geometry: &GeometryState, cell: usize, face: &BoundaryFace) -> QuadratureRule {
        let mut rule = QuadratureRule::default();
        if geometry.classify(cell) == Location::Outside {
            return rule;
        }
        let values = geometry.face_samples(cell, face.direction);
        let m = values.len() - 1;
        let edge = face.end - face.start;
        for s in 0..m {
            let a = face.start + edge * (s as f64 / m as f64);
            let b = face.start + edge * ((s + 1) as f64 / m as f64);
            let (fa, fb) = (values[s], values[s + 1]);
            let segment = match (fa < 0.0, fb < 0.0) {
                (true, true) => Some((a, b)),
                (true, false) => Some((a, crossing(&a, fa, &b, fb))),
                (false, true) => Some((crossing(&a, fa, &b, fb), b)),
                (false, false) => None,
            };
            if let Some((a, b)) = segment {
                rule.extend(gauss_segment(&a, &b, self.n_points));
            }
        }
        rule
    }
}

/// Zero of the linear interpolant between `(a, fa)` and `(b, fb)`, which have opposite signs.
fn crossing(a: &Point, fa: f64, b: &Point, fb: f64) -> Point {
    let t = fa / (fa - fb);
    *a + (*b - *a) * t
}

/// Part of the triangle where its linear level set is negative, as a convex
/// polygon in counter-clockwise order (empty if the triangle is outside).
fn clip_triangle(triangle: &[(Point, f64); 3]) -> Vec<Point> {
    let mut polygon = Vec::with_capacity(4);
    for k in 0..3 {
        let (p, fp) = triangle[k];
        let (q, fq) = triangle[(k + 1) % 3];
        if fp < 0.0 {
            polygon.push(p);
        }
        if (fp < 0.0) != (fq < 0.0) {
            polygon.push(crossing(&p, fp, &q, fq));
        }
    }
    polygon
}

/// The segment where the linear level set of the triangle vanishes, if the
/// triangle straddles it.
fn zero_segment(triangle: &[(Point, f64); 3]) -> Option<(Point, Point)> {
    let mut ends = Vec::with_capacity(2);
    for k in 0..3 {
        let (p, fp) = triangle[k];
        let (q, fq) = triangle[(k + 1) % 3];
        if (fp < 0.0) != (fq < 0.0) {
            ends.push(crossing(&p, fp, &q, fq));
        }
    }
    match ends.as_slice() {
        [a, b] => Some((*a, *b)),
        _ => None,
    }
}

/// Gradient of the linear function through the three vertex values.
fn linear_gradient(triangle: &[(Point, f64); 3]) -> Tensor1 {
    let (a, fa) = triangle[0];
    let (b, fb) = triangle[1];
    let (c, fc) = triangle[2];
    let e1 = b - a;
    let e2 = c - a;
    let det = e1.x * e2.y - e1.y * e2.x;
    let (d1, d2) = (fb - fa, fc - fa);
    Tensor1::new((d1 * e2.y - d2 * e1.y) / det, (e1.x * d2 - e2.x * d1) / det)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::analytic::Circle;
    use crate::meshing::{FaceDirection, Mesh, INLET_ID};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn geometry(radius: f64) -> GeometryState {
        let mesh = Mesh::rectangle([-1.25, -1.25], [1.25, 1.25], 8, 8).unwrap();
        GeometryState::new(mesh, Circle::interior(Point::origin(), radius), false, 4).unwrap()
    }

    #[test]
    fn test_disc_area_and_perimeter() {
        let geometry = geometry(1.0);
        let quadrature = SubdivisionQuadrature::default();
        let (mut area, mut perimeter) = (0.0, 0.0);
        for cell in 0..geometry.mesh().n_cells() {
            area += quadrature.inside(&geometry, cell).measure();
            perimeter += quadrature.surface(&geometry, cell).measure();
        }
        assert_relative_eq!(area, PI, max_relative = 1e-2);
        assert_relative_eq!(perimeter, 2.0 * PI, max_relative = 1e-2);
    }

    #[test]
    fn test_divergence_theorem_on_discrete_domain() {
        // div(x) = 2, so the flux of x through the immersed boundary is twice the area.
        let geometry = geometry(0.8);
        let quadrature = SubdivisionQuadrature::default();
        let (mut area, mut flux) = (0.0, 0.0);
        for cell in 0..geometry.mesh().n_cells() {
            area += quadrature.inside(&geometry, cell).measure();
            flux += quadrature
                .surface(&geometry, cell)
                .iter()
                .map(|(p, w, n)| w * p.coords.dot(n))
                .sum::<f64>();
        }
        assert_relative_eq!(flux, 2.0 * area, epsilon = 1e-11);
    }

    #[test]
    fn test_normals_point_out_of_the_domain() {
        let geometry = geometry(1.0);
        let quadrature = SubdivisionQuadrature::default();
        for cell in 0..geometry.mesh().n_cells() {
            for (p, _, n) in quadrature.surface(&geometry, cell).iter() {
                assert!(p.coords.dot(n) > 0.0);
                assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_boundary_face_is_clipped() {
        // Disc of radius 2 centred at the origin cuts the west face x = -1.25 at |y| < 1.5612.
        let mesh = Mesh::rectangle([-1.25, -2.0], [1.25, 2.0], 2, 4).unwrap();
        let geometry = GeometryState::new(mesh.clone(), Circle::interior(Point::origin(), 2.0), false, 8).unwrap();
        let quadrature = SubdivisionQuadrature::default();
        let mut length = 0.0;
        for cell in 0..mesh.n_cells() {
            for face in mesh.boundary_faces(cell) {
                if face.boundary_id == INLET_ID {
                    assert_eq!(face.direction, FaceDirection::West);
                    length += quadrature.boundary_face(&geometry, cell, &face).measure();
                }
            }
        }
        let exact = 2.0 * (4.0f64 - 1.25 * 1.25).sqrt();
        assert_relative_eq!(length, exact, max_relative = 1e-2);
    }

    #[test]
    fn test_outside_cells_have_empty_rules() {
        let geometry = geometry(1.0);
        let quadrature = SubdivisionQuadrature::default();
        let corner = geometry.mesh().cell_index(0, 0);
        assert_eq!(geometry.classify(corner), Location::Outside);
        assert!(quadrature.inside(&geometry, corner).is_empty());
        assert!(quadrature.surface(&geometry, corner).is_empty());
    }
}
