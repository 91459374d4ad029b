//! Integer geometry in surface coordinates.
//!
//! Wayland transmits sizes and positions as `i32`, so everything here is
//! signed. Sizes are never negative in practice; arithmetic that could take
//! them below zero saturates at zero.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Width/height pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const ZERO: Self = Self::new(0, 0);

    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Whether both dimensions are zero ("compositor has no preference").
    pub const fn is_zero(self) -> bool {
        self.width == 0 && self.height == 0
    }

    /// Component-wise subtraction clamped at zero.
    pub fn saturating_sub(self, other: Self) -> Self {
        Self::new(
            (self.width - other.width).max(0),
            (self.height - other.height).max(0),
        )
    }

    pub fn area(self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.width + rhs.width, self.height + rhs.height)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.width - rhs.width, self.height - rhs.height)
    }
}

impl Mul<i32> for Size {
    type Output = Self;

    fn mul(self, rhs: i32) -> Self {
        Self::new(self.width * rhs, self.height * rhs)
    }
}

impl Div<i32> for Size {
    type Output = Self;

    fn div(self, rhs: i32) -> Self {
        Self::new(self.width / rhs, self.height / rhs)
    }
}

/// Position in surface-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ORIGIN: Self = Self::new(0, 0);

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Round a fractional (`wl_fixed`) position down to whole pixels.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_fractional(x: f64, y: f64) -> Self {
        Self::new(x.floor() as i32, y.floor() as i32)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<i32> for Point {
    type Output = Self;

    fn mul(self, rhs: i32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned rectangle: origin plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub const fn from_parts(origin: Point, size: Size) -> Self {
        Self { origin, size }
    }

    pub const fn x(self) -> i32 {
        self.origin.x
    }

    pub const fn y(self) -> i32 {
        self.origin.y
    }

    pub const fn width(self) -> i32 {
        self.size.width
    }

    pub const fn height(self) -> i32 {
        self.size.height
    }

    /// Exclusive right edge.
    pub const fn right(self) -> i32 {
        self.origin.x + self.size.width
    }

    /// Exclusive bottom edge.
    pub const fn bottom(self) -> i32 {
        self.origin.y + self.size.height
    }

    pub const fn contains(self, point: Point) -> bool {
        point.x >= self.origin.x
            && point.x < self.right()
            && point.y >= self.origin.y
            && point.y < self.bottom()
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.origin.x < other.right()
            && self.right() > other.origin.x
            && self.origin.y < other.bottom()
            && self.bottom() > other.origin.y
    }

    /// Whether `other` lies completely within `self`.
    pub const fn encloses(self, other: Self) -> bool {
        other.origin.x >= self.origin.x
            && other.origin.y >= self.origin.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Shrink by `amount` on every side.
    pub fn inset(self, amount: i32) -> Self {
        Self::new(
            self.origin.x + amount,
            self.origin.y + amount,
            (self.size.width - 2 * amount).max(0),
            (self.size.height - 2 * amount).max(0),
        )
    }

    pub fn translate(self, by: Point) -> Self {
        Self::from_parts(self.origin + by, self.size)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.size, self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_arithmetic() {
        let size = Size::new(800, 600);
        assert_eq!(size * 2, Size::new(1600, 1200));
        assert_eq!(Size::new(1600, 1200) / 2, size);
        assert_eq!(size.saturating_sub(Size::new(900, 100)), Size::new(0, 500));
        assert!(Size::ZERO.is_zero());
        assert!(!Size::new(0, 1).is_zero());
        assert_eq!(size.area(), 480_000);
        assert_eq!(Size::new(-5, 10).area(), 0);
    }

    #[test]
    fn test_rect_contains_is_half_open() {
        let rect = Rect::new(10, 10, 5, 5);
        assert!(rect.contains(Point::new(10, 10)));
        assert!(rect.contains(Point::new(14, 14)));
        assert!(!rect.contains(Point::new(15, 14)));
        assert!(!rect.contains(Point::new(9, 12)));
    }

    #[test]
    fn test_rect_intersects_and_encloses() {
        let outer = Rect::new(0, 0, 100, 50);
        let inner = Rect::new(10, 10, 20, 20);
        let adjacent = Rect::new(100, 0, 10, 10);
        assert!(outer.encloses(inner));
        assert!(outer.intersects(inner));
        assert!(!outer.intersects(adjacent));
        assert!(!inner.encloses(outer));
    }

    #[test]
    fn test_fractional_position_floors() {
        assert_eq!(Point::from_fractional(3.9, -0.5), Point::new(3, -1));
    }
}
