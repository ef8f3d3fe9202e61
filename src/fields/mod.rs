// src/fields/mod.rs

//! Pluggable space-time functions: right-hand sides, boundary data, analytic
//! reference solutions and level sets.
//!
//! A [`Field`] is a pure function of position and time. The engine binds it to
//! the current simulation time through a [`TimeFunction`], whose `set_time` is
//! called for every function before each assembly.

pub mod analytic;

use crate::kernel::{Point, Tensor1, Tensor2};

/// Value types a field can take: scalars or 2D vectors.
pub trait FieldValue: Copy + Send + Sync + 'static {
    type Gradient: Copy + Send + Sync + 'static;

    fn zero() -> Self;
    fn zero_gradient() -> Self::Gradient;
}

impl FieldValue for f64 {
    type Gradient = Tensor1;

    fn zero() -> Self {
        0.0
    }

    fn zero_gradient() -> Tensor1 {
        Tensor1::zeros()
    }
}

impl FieldValue for Tensor1 {
    type Gradient = Tensor2;

    fn zero() -> Self {
        Tensor1::zeros()
    }

    fn zero_gradient() -> Tensor2 {
        Tensor2::zeros()
    }
}

/// A function of space and time.
///
/// For vector fields the gradient is `G[(i, j)] = d v_i / d x_j`.
pub trait Field<V: FieldValue>: Send + Sync {
    fn value_at(&self, p: &Point, t: f64) -> V;

    /// Spatial gradient. Only analytic reference solutions need a real one.
    fn gradient_at(&self, _p: &Point, _t: f64) -> V::Gradient {
        V::zero_gradient()
    }
}

impl<V: FieldValue> Field<V> for Box<dyn Field<V>> {
    fn value_at(&self, p: &Point, t: f64) -> V {
        self.as_ref().value_at(p, t)
    }

    fn gradient_at(&self, p: &Point, t: f64) -> V::Gradient {
        self.as_ref().gradient_at(p, t)
    }
}

/// Adapts a closure `|p, t| value` into a [`Field`] with zero gradient.
pub struct FnField<F>(pub F);

impl<V, F> Field<V> for FnField<F>
where
    V: FieldValue,
    F: Fn(&Point, f64) -> V + Send + Sync,
{
    fn value_at(&self, p: &Point, t: f64) -> V {
        (self.0)(p, t)
    }
}

/// A field bound to the current simulation time.
pub struct TimeFunction<V: FieldValue> {
    field: Box<dyn Field<V>>,
    time: f64,
}

impl<V: FieldValue> TimeFunction<V> {
    pub fn new(field: impl Field<V> + 'static) -> Self {
        TimeFunction { field: Box::new(field), time: 0.0 }
    }

    pub fn from_box(field: Box<dyn Field<V>>) -> Self {
        TimeFunction { field, time: 0.0 }
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    pub fn value(&self, p: &Point) -> V {
        self.field.value_at(p, self.time)
    }

    #[inline]
    pub fn gradient(&self, p: &Point) -> V::Gradient {
        self.field.gradient_at(p, self.time)
    }
}

impl<V: FieldValue> std::fmt::Debug for TimeFunction<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeFunction").field("time", &self.time).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_closure_field_sees_bound_time() {
        let mut f = TimeFunction::new(FnField(|p: &Point, t: f64| p.x + 10.0 * t));
        let p = Point::new(0.5, 0.0);
        assert_relative_eq!(f.value(&p), 0.5);
        f.set_time(0.25);
        assert_relative_eq!(f.time(), 0.25);
        assert_relative_eq!(f.value(&p), 3.0);
        assert_relative_eq!(f.gradient(&p).norm(), 0.0);
    }

    #[test]
    fn test_vector_closure_field() {
        let f = TimeFunction::new(FnField(|p: &Point, _t: f64| Tensor1::new(p.y, -p.x)));
        let v = f.value(&Point::new(1.0, 2.0));
        assert_relative_eq!(v.x, 2.0);
        assert_relative_eq!(v.y, -1.0);
    }
}
