// src/kernel/mod.rs

//! The numerical kernel of the engine.
//! Shared linear algebra aliases, Gauss rules and the Lagrange shape functions
//! used by every assembly routine.

pub mod lagrange;

use nalgebra::{DMatrix, DVector, Matrix2, Point2, Vector2};

pub use lagrange::{Lagrange1d, LagrangeBasis, ShapeValues};

// Type aliases for clarity throughout the engine.
pub type Matrix = DMatrix<f64>;
pub type Vector = DVector<f64>;
pub type Point = Point2<f64>;
/// Rank-1 tensor in 2D (velocities, gradients of scalars, normals).
pub type Tensor1 = Vector2<f64>;
/// Rank-2 tensor in 2D (velocity gradients).
pub type Tensor2 = Matrix2<f64>;

/// Gauss-Legendre points and weights on [-1, 1] for 1..=6 points.
const GAUSS_TABLE: [&[(f64, f64)]; 6] = [
    &[(0.0, 2.0)],
    &[(-0.577_350_269_189_625_7, 1.0), (0.577_350_269_189_625_7, 1.0)],
    &[
        (-0.774_596_669_241_483_4, 0.555_555_555_555_555_6),
        (0.0, 0.888_888_888_888_888_8),
        (0.774_596_669_241_483_4, 0.555_555_555_555_555_6),
    ],
    &[
        (-0.861_136_311_594_052_6, 0.347_854_845_137_453_8),
        (-0.339_981_043_584_856_3, 0.652_145_154_862_546_1),
        (0.339_981_043_584_856_3, 0.652_145_154_862_546_1),
        (0.861_136_311_594_052_6, 0.347_854_845_137_453_8),
    ],
    &[
        (-0.906_179_845_938_664, 0.236_926_885_056_189_1),
        (-0.538_469_310_105_683_1, 0.478_628_670_499_366_5),
        (0.0, 0.568_888_888_888_888_9),
        (0.538_469_310_105_683_1, 0.478_628_670_499_366_5),
        (0.906_179_845_938_664, 0.236_926_885_056_189_1),
    ],
    &[
        (-0.932_469_514_203_152_1, 0.171_324_492_379_170_4),
        (-0.661_209_386_466_264_5, 0.360_761_573_048_138_6),
        (-0.238_619_186_083_196_9, 0.467_913_934_572_691),
        (0.238_619_186_083_196_9, 0.467_913_934_572_691),
        (0.661_209_386_466_264_5, 0.360_761_573_048_138_6),
        (0.932_469_514_203_152_1, 0.171_324_492_379_170_4),
    ],
];

/// Largest number of points available from [`gauss_legendre`].
pub const MAX_GAUSS_POINTS: usize = GAUSS_TABLE.len();

/// Gauss-Legendre rule with `n` points mapped onto the unit interval [0, 1].
///
/// `n` is clamped to `1..=MAX_GAUSS_POINTS`; an `n`-point rule integrates
/// polynomials of degree `2n - 1` exactly.
pub fn gauss_legendre(n: usize) -> Vec<(f64, f64)> {
    let n = n.clamp(1, MAX_GAUSS_POINTS);
    GAUSS_TABLE[n - 1]
        .iter()
        .map(|&(x, w)| (0.5 * (x + 1.0), 0.5 * w))
        .collect()
}

/// Tensor Gauss rule on the axis-aligned box `[x0, x0 + hx] x [y0, y0 + hy]`,
/// weights already multiplied by the box area.
pub fn gauss_box(origin: &Point, hx: f64, hy: f64, n: usize) -> Vec<(Point, f64)> {
    let rule = gauss_legendre(n);
    let mut out = Vec::with_capacity(rule.len() * rule.len());
    for &(eta, wy) in &rule {
        for &(xi, wx) in &rule {
            out.push((
                Point::new(origin.x + xi * hx, origin.y + eta * hy),
                wx * wy * hx * hy,
            ));
        }
    }
    out
}

/// Gauss rule on the triangle `(a, b, c)` through the collapsed (Duffy) map,
/// weights already multiplied by the Jacobian.
pub fn gauss_triangle(a: &Point, b: &Point, c: &Point, n: usize) -> Vec<(Point, f64)> {
    let rule = gauss_legendre(n);
    let e1 = *b - *a;
    let e2 = *c - *a;
    let det = (e1.x * e2.y - e1.y * e2.x).abs();
    let mut out = Vec::with_capacity(rule.len() * rule.len());
    for &(s, ws) in &rule {
        for &(t, wt) in &rule {
            // (s, t) in the unit square -> (s, t(1 - s)) in the reference triangle.
            let u = s;
            let v = t * (1.0 - s);
            out.push((*a + e1 * u + e2 * v, ws * wt * (1.0 - s) * det));
        }
    }
    out
}

/// Gauss rule on the segment `[a, b]`, weights multiplied by the segment length.
pub fn gauss_segment(a: &Point, b: &Point, n: usize) -> Vec<(Point, f64)> {
    let edge = *b - *a;
    let length = edge.norm();
    gauss_legendre(n)
        .into_iter()
        .map(|(s, w)| (*a + edge * s, w * length))
        .collect()
}

/// Frobenius inner product `A : B` of two rank-2 tensors.
#[inline]
pub fn double_contract(a: &Tensor2, b: &Tensor2) -> f64 {
    a.component_mul(b).sum()
}
