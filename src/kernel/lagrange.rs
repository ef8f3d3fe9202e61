// src/kernel/lagrange.rs

//! Tensor-product Lagrange shape functions on axis-aligned quadrilaterals.
//!
//! Local numbering follows the node lattice of the cell: the local index of
//! lattice node `(i, j)` is `i + (degree + 1) * j`, with `i` running along x.

use super::{Point, Tensor1};
use crate::meshing::CellGeometry;

/// One-dimensional Lagrange polynomials on equispaced nodes of [0, 1],
/// stored as monomial coefficients so that derivatives of any order are cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Lagrange1d {
    degree: usize,
    coefficients: Vec<Vec<f64>>,
}

impl Lagrange1d {
    pub fn new(degree: usize) -> Self {
        let nodes: Vec<f64> = (0..=degree)
            .map(|i| if degree == 0 { 0.5 } else { i as f64 / degree as f64 })
            .collect();

        let coefficients = (0..=degree)
            .map(|i| {
                let mut poly = vec![1.0];
                for (j, &xj) in nodes.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let denom = nodes[i] - xj;
                    // poly *= (x - xj) / denom
                    let mut next = vec![0.0; poly.len() + 1];
                    for (k, &c) in poly.iter().enumerate() {
                        next[k + 1] += c / denom;
                        next[k] -= c * xj / denom;
                    }
                    poly = next;
                }
                poly
            })
            .collect();

        Lagrange1d { degree, coefficients }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// `order`-th derivative of basis polynomial `i` at `x`.
    pub fn derivative(&self, i: usize, order: usize, x: f64) -> f64 {
        let coeffs = &self.coefficients[i];
        let mut value = 0.0;
        let mut power = 1.0;
        for n in order..coeffs.len() {
            let falling: f64 = ((n - order + 1)..=n).map(|k| k as f64).product();
            value += coeffs[n] * falling * power;
            power *= x;
        }
        value
    }

    pub fn value(&self, i: usize, x: f64) -> f64 {
        self.derivative(i, 0, x)
    }
}

/// Shape function values and physical gradients at one point.
#[derive(Debug, Clone)]
pub struct ShapeValues {
    pub values: Vec<f64>,
    pub gradients: Vec<Tensor1>,
}

/// Q_k basis on one quadrilateral cell.
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangeBasis {
    line: Lagrange1d,
}

impl LagrangeBasis {
    pub fn new(degree: usize) -> Self {
        LagrangeBasis { line: Lagrange1d::new(degree) }
    }

    pub fn degree(&self) -> usize {
        self.line.degree()
    }

    pub fn dofs_per_cell(&self) -> usize {
        (self.degree() + 1).pow(2)
    }

    /// Lattice position `(i, j)` of local shape function `local`.
    #[inline]
    pub fn lattice(&self, local: usize) -> (usize, usize) {
        let n = self.degree() + 1;
        (local % n, local / n)
    }

    /// Values and gradients of all cell shape functions at the physical point `p`.
    pub fn shape(&self, cell: &CellGeometry, p: &Point) -> ShapeValues {
        let (xi, eta) = cell.to_reference(p);
        let n = self.dofs_per_cell();
        let mut values = Vec::with_capacity(n);
        let mut gradients = Vec::with_capacity(n);
        for local in 0..n {
            let (i, j) = self.lattice(local);
            let lx = self.line.value(i, xi);
            let ly = self.line.value(j, eta);
            values.push(lx * ly);
            gradients.push(Tensor1::new(
                self.line.derivative(i, 1, xi) * ly / cell.hx,
                lx * self.line.derivative(j, 1, eta) / cell.hy,
            ));
        }
        ShapeValues { values, gradients }
    }

    /// `order`-th derivative of every shape function along coordinate `axis`
    /// (0 = x, 1 = y) at the physical point `p`.
    pub fn axis_derivatives(&self, cell: &CellGeometry, p: &Point, axis: usize, order: usize) -> Vec<f64> {
        let (xi, eta) = cell.to_reference(p);
        (0..self.dofs_per_cell())
            .map(|local| {
                let (i, j) = self.lattice(local);
                if axis == 0 {
                    self.line.derivative(i, order, xi) * self.line.value(j, eta)
                        / cell.hx.powi(order as i32)
                } else {
                    self.line.value(i, xi) * self.line.derivative(j, order, eta)
                        / cell.hy.powi(order as i32)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_cell() -> CellGeometry {
        CellGeometry { origin: Point::new(1.0, -1.0), hx: 0.5, hy: 0.25 }
    }

    #[test]
    fn test_lagrange_1d_is_nodal() {
        for degree in 1..=3 {
            let line = Lagrange1d::new(degree);
            for i in 0..=degree {
                for j in 0..=degree {
                    let x = j as f64 / degree as f64;
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_relative_eq!(line.value(i, x), expected, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_lagrange_1d_second_derivative_of_quadratic() {
        // Middle node of the quadratic basis: 4x(1 - x), second derivative -8.
        let line = Lagrange1d::new(2);
        assert_relative_eq!(line.derivative(1, 2, 0.3), -8.0, epsilon = 1e-12);
        assert_relative_eq!(line.derivative(1, 3, 0.3), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_partition_of_unity_and_zero_gradient_sum() {
        let cell = unit_cell();
        for degree in 1..=2 {
            let basis = LagrangeBasis::new(degree);
            let shape = basis.shape(&cell, &Point::new(1.17, -0.93));
            let sum: f64 = shape.values.iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
            let grad: Tensor1 = shape.gradients.iter().sum();
            assert_relative_eq!(grad.norm(), 0.0, epsilon = 1e-11);
        }
    }

    #[test]
    fn test_linear_function_is_reproduced_with_exact_gradient() {
        let cell = unit_cell();
        let basis = LagrangeBasis::new(2);
        let f = |p: &Point| 3.0 * p.x - 2.0 * p.y + 1.0;
        let coeffs: Vec<f64> = (0..basis.dofs_per_cell())
            .map(|local| f(&cell.lattice_point(basis.lattice(local), basis.degree())))
            .collect();
        let p = Point::new(1.31, -0.82);
        let shape = basis.shape(&cell, &p);
        let value: f64 = shape.values.iter().zip(&coeffs).map(|(v, c)| v * c).sum();
        let grad: Tensor1 = shape.gradients.iter().zip(&coeffs).map(|(g, c)| g * *c).sum();
        assert_relative_eq!(value, f(&p), epsilon = 1e-12);
        assert_relative_eq!(grad.x, 3.0, epsilon = 1e-11);
        assert_relative_eq!(grad.y, -2.0, epsilon = 1e-11);

        let dxx = basis.axis_derivatives(&cell, &p, 0, 2);
        let second: f64 = dxx.iter().zip(&coeffs).map(|(d, c)| d * c).sum();
        assert_relative_eq!(second, 0.0, epsilon = 1e-9);
    }
}
