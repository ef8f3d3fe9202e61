// src/fields/analytic.rs

//! Manufactured solutions and level sets used by the convergence studies.

use std::f64::consts::PI;

use super::{Field, FieldValue};
use crate::kernel::{Point, Tensor1, Tensor2};

/// A field that is the same everywhere and at all times.
#[derive(Debug, Clone, Copy)]
pub struct Constant<V>(pub V);

impl<V: FieldValue> Field<V> for Constant<V> {
    fn value_at(&self, _p: &Point, _t: f64) -> V {
        self.0
    }
}

/// Fluid at rest: zero velocity everywhere.
pub fn zero_velocity() -> Constant<Tensor1> {
    Constant(Tensor1::zeros())
}

// --- Ethier-Steinman type Stokes solution ---

/// Divergence-free velocity
/// `u = (-sin(pi y) cos(pi x), sin(pi x) cos(pi y)) cos t`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthierSteinmanVelocity;

impl Field<Tensor1> for EthierSteinmanVelocity {
    fn value_at(&self, p: &Point, t: f64) -> Tensor1 {
        let (x, y) = (PI * p.x, PI * p.y);
        Tensor1::new(-y.sin() * x.cos() * t.cos(), x.sin() * y.cos() * t.cos())
    }

    fn gradient_at(&self, p: &Point, t: f64) -> Tensor2 {
        let (x, y) = (PI * p.x, PI * p.y);
        let c = PI * t.cos();
        Tensor2::new(
            c * x.sin() * y.sin(),
            -c * x.cos() * y.cos(),
            c * x.cos() * y.cos(),
            -c * x.sin() * y.sin(),
        )
    }
}

/// Pressure `p = -(cos(2 pi x) + cos(2 pi y)) cos t / 4`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthierSteinmanPressure;

impl Field<f64> for EthierSteinmanPressure {
    fn value_at(&self, p: &Point, t: f64) -> f64 {
        -((2.0 * PI * p.x).cos() + (2.0 * PI * p.y).cos()) * t.cos() / 4.0
    }

    fn gradient_at(&self, p: &Point, t: f64) -> Tensor1 {
        let c = PI * t.cos();
        Tensor1::new(
            c * (PI * p.x).sin() * (PI * p.x).cos(),
            c * (PI * p.y).sin() * (PI * p.y).cos(),
        )
    }
}

/// Forcing `f = u_t - nu lap u + grad p` of the Ethier-Steinman pair.
#[derive(Debug, Clone, Copy)]
pub struct EthierSteinmanForcing {
    pub nu: f64,
}

impl Field<Tensor1> for EthierSteinmanForcing {
    fn value_at(&self, p: &Point, t: f64) -> Tensor1 {
        let (x, y) = (PI * p.x, PI * p.y);
        let diffusion = 2.0 * self.nu * PI * PI * t.cos();
        Tensor1::new(
            -diffusion * y.sin() * x.cos() + t.sin() * y.sin() * x.cos() + PI * x.sin() * x.cos() * t.cos(),
            diffusion * x.sin() * y.cos() - t.sin() * x.sin() * y.cos() + PI * y.sin() * y.cos() * t.cos(),
        )
    }
}

// --- Navier-Stokes ---

/// Forcing of the Ethier-Steinman pair for the Navier-Stokes equations:
/// [`EthierSteinmanForcing`] plus the convection `(u . grad) u`.
#[derive(Debug, Clone, Copy)]
pub struct NavierStokesForcing {
    pub nu: f64,
}

impl Field<Tensor1> for NavierStokesForcing {
    fn value_at(&self, p: &Point, t: f64) -> Tensor1 {
        let u = EthierSteinmanVelocity;
        EthierSteinmanForcing { nu: self.nu }.value_at(p, t) + u.gradient_at(p, t) * u.value_at(p, t)
    }
}

/// Prescribed convection velocity of an Oseen problem: the Ethier-Steinman
/// velocity, so the Ethier-Steinman pair with [`NavierStokesForcing`] solves
/// the linearized equations exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvectionField;

impl Field<Tensor1> for ConvectionField {
    fn value_at(&self, p: &Point, t: f64) -> Tensor1 {
        EthierSteinmanVelocity.value_at(p, t)
    }

    fn gradient_at(&self, p: &Point, t: f64) -> Tensor2 {
        EthierSteinmanVelocity.gradient_at(p, t)
    }
}

/// Channel inflow: a parabolic profile on the inlet `x = -half_length`,
/// ramped up in time as `1 - exp(-t / boundary_layer)`, and zero elsewhere
/// (no-slip walls).
#[derive(Debug, Clone, Copy)]
pub struct ParabolicFlow {
    pub radius: f64,
    pub half_length: f64,
    pub max_speed: f64,
    pub boundary_layer: f64,
}

impl Field<Tensor1> for ParabolicFlow {
    fn value_at(&self, p: &Point, t: f64) -> Tensor1 {
        if (p.x + self.half_length).abs() > 1e-12 * self.half_length {
            return Tensor1::zeros();
        }
        let profile = 1.0 - (p.y / self.radius).powi(2);
        Tensor1::new(self.max_speed * profile * (1.0 - (-t / self.boundary_layer).exp()), 0.0)
    }
}

// --- Heat equation ---

/// `u = sin(pi x) sin(pi y) cos t`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeatSolution;

impl Field<f64> for HeatSolution {
    fn value_at(&self, p: &Point, t: f64) -> f64 {
        (PI * p.x).sin() * (PI * p.y).sin() * t.cos()
    }

    fn gradient_at(&self, p: &Point, t: f64) -> Tensor1 {
        let c = PI * t.cos();
        Tensor1::new(
            c * (PI * p.x).cos() * (PI * p.y).sin(),
            c * (PI * p.x).sin() * (PI * p.y).cos(),
        )
    }
}

/// Forcing `f = u_t - nu lap u` for [`HeatSolution`].
#[derive(Debug, Clone, Copy)]
pub struct HeatForcing {
    pub nu: f64,
}

impl Field<f64> for HeatForcing {
    fn value_at(&self, p: &Point, t: f64) -> f64 {
        let s = (PI * p.x).sin() * (PI * p.y).sin();
        -s * t.sin() + 2.0 * self.nu * PI * PI * s * t.cos()
    }
}

// --- Level sets (negative inside the flow domain) ---

/// A circle of fixed position.
#[derive(Debug, Clone, Copy)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
    /// `true` when the domain lies outside the circle (an obstacle).
    pub exterior: bool,
}

impl Circle {
    /// Domain is the disc.
    pub fn interior(center: Point, radius: f64) -> Self {
        Circle { center, radius, exterior: false }
    }

    /// Domain is everything outside the disc.
    pub fn exterior(center: Point, radius: f64) -> Self {
        Circle { center, radius, exterior: true }
    }
}

impl Field<f64> for Circle {
    fn value_at(&self, p: &Point, _t: f64) -> f64 {
        let d = (*p - self.center).norm() - self.radius;
        if self.exterior {
            -d
        } else {
            d
        }
    }

    fn gradient_at(&self, p: &Point, _t: f64) -> Tensor1 {
        let r = *p - self.center;
        let n = r.norm();
        if n == 0.0 {
            return Tensor1::zeros();
        }
        if self.exterior {
            -r / n
        } else {
            r / n
        }
    }
}

/// A circular obstacle travelling diagonally through the channel
/// `[-half_length, half_length] x [-channel_radius, channel_radius]`.
///
/// The centre moves from the lower-left to the upper-right corner region over
/// `path_duration`, staying a tenth of the free gap away from the walls.
#[derive(Debug, Clone, Copy)]
pub struct MovingCircle {
    pub radius: f64,
    pub half_length: f64,
    pub channel_radius: f64,
    pub path_duration: f64,
}

impl MovingCircle {
    pub fn center(&self, t: f64) -> Point {
        let s = 2.0 * t / self.path_duration - 1.0;
        Point::new(
            0.9 * (self.half_length - self.radius) * s,
            0.9 * (self.channel_radius - self.radius) * s,
        )
    }

    fn at(&self, t: f64) -> Circle {
        Circle::exterior(self.center(t), self.radius)
    }
}

impl Field<f64> for MovingCircle {
    fn value_at(&self, p: &Point, t: f64) -> f64 {
        self.at(t).value_at(p, t)
    }

    fn gradient_at(&self, p: &Point, t: f64) -> Tensor1 {
        self.at(t).gradient_at(p, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn central_gradient<F: Field<f64>>(f: &F, p: &Point, t: f64) -> Tensor1 {
        let h = 1e-6;
        let dx = Tensor1::new(h, 0.0);
        let dy = Tensor1::new(0.0, h);
        Tensor1::new(
            (f.value_at(&(*p + dx), t) - f.value_at(&(*p - dx), t)) / (2.0 * h),
            (f.value_at(&(*p + dy), t) - f.value_at(&(*p - dy), t)) / (2.0 * h),
        )
    }

    #[test]
    fn test_ethier_steinman_velocity_is_divergence_free() {
        let u = EthierSteinmanVelocity;
        for &(x, y, t) in &[(0.1, 0.3, 0.0), (-0.7, 0.45, 0.8), (0.33, -0.9, 1.7)] {
            let g = u.gradient_at(&Point::new(x, y), t);
            assert_relative_eq!(g.trace(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_analytic_gradients_match_finite_differences() {
        let p = Point::new(0.21, -0.37);
        let t = 0.6;
        let fd = central_gradient(&EthierSteinmanPressure, &p, t);
        let exact = EthierSteinmanPressure.gradient_at(&p, t);
        assert_relative_eq!(fd, exact, epsilon = 1e-7);

        let fd = central_gradient(&HeatSolution, &p, t);
        let exact = HeatSolution.gradient_at(&p, t);
        assert_relative_eq!(fd, exact, epsilon = 1e-7);

        let circle = Circle::interior(Point::new(0.1, 0.0), 0.5);
        let fd = central_gradient(&circle, &p, t);
        assert_relative_eq!(fd, circle.gradient_at(&p, t), epsilon = 1e-7);
    }

    #[test]
    fn test_navier_stokes_forcing_adds_convection() {
        // For this velocity (u . grad) u = -pi cos^2 t (sin(pi x) cos(pi x), sin(pi y) cos(pi y)).
        let p = Point::new(0.3, -0.15);
        let t = 0.4;
        let difference =
            NavierStokesForcing { nu: 0.1 }.value_at(&p, t) - EthierSteinmanForcing { nu: 0.1 }.value_at(&p, t);
        let c = PI * t.cos().powi(2);
        let expected = Tensor1::new(
            -c * (PI * p.x).sin() * (PI * p.x).cos(),
            -c * (PI * p.y).sin() * (PI * p.y).cos(),
        );
        assert_relative_eq!(difference, expected, epsilon = 1e-12);
        assert_relative_eq!(ConvectionField.value_at(&p, t), EthierSteinmanVelocity.value_at(&p, t));
    }

    #[test]
    fn test_parabolic_flow_only_on_the_inlet() {
        let inflow = ParabolicFlow { radius: 0.5, half_length: 2.0, max_speed: 1.5, boundary_layer: 0.1 };
        let centre = Point::new(-2.0, 0.0);
        assert_relative_eq!(inflow.value_at(&centre, 0.0).x, 0.0);
        assert_relative_eq!(inflow.value_at(&centre, 10.0).x, 1.5, epsilon = 1e-12);
        assert_relative_eq!(inflow.value_at(&Point::new(-2.0, 0.25), 10.0).x, 1.125, epsilon = 1e-12);
        assert_relative_eq!(inflow.value_at(&Point::new(-2.0, 0.5), 10.0).x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(inflow.value_at(&Point::new(2.0, 0.0), 10.0).norm(), 0.0);
        assert_relative_eq!(inflow.value_at(&centre, 10.0).y, 0.0);
    }

    #[test]
    fn test_circle_sign_convention() {
        let inside = Point::new(0.1, 0.1);
        let outside = Point::new(2.0, 0.0);
        let disc = Circle::interior(Point::origin(), 1.0);
        let obstacle = Circle::exterior(Point::origin(), 1.0);
        assert!(disc.value_at(&inside, 0.0) < 0.0);
        assert!(disc.value_at(&outside, 0.0) > 0.0);
        assert!(obstacle.value_at(&inside, 0.0) > 0.0);
        assert!(obstacle.value_at(&outside, 0.0) < 0.0);
    }

    #[test]
    fn test_moving_circle_crosses_the_channel() {
        let circle = MovingCircle { radius: 0.1, half_length: 1.0, channel_radius: 0.5, path_duration: 2.0 };
        let start = circle.center(0.0);
        let middle = circle.center(1.0);
        let end = circle.center(2.0);
        assert_relative_eq!(start.x, -0.81, epsilon = 1e-12);
        assert_relative_eq!(start.y, -0.36, epsilon = 1e-12);
        assert_relative_eq!(middle.coords.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(end.x, 0.81, epsilon = 1e-12);
        // The centre itself is outside the flow domain.
        assert!(circle.value_at(&middle, 1.0) > 0.0);
    }
}
