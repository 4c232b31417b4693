use glam::{Affine2, Mat2, Vec2 as GlamVec2};
use serde::{Deserialize, Serialize};

use crate::pool::Poolable;

/// 2D vector type used throughout Sparkle2D.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };
    pub const ONE: Self = Self { x: 1.0, y: 1.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn set(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Returns the squared length of the vector (faster than `length()`).
    pub fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn normalized(&self) -> Self {
        let len = self.length();
        if len == 0.0 {
            Self::ZERO
        } else {
            Self::new(self.x / len, self.y / len)
        }
    }

    /// Counter-clockwise perpendicular `(-y, x)`.
    pub fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }

    /// Computes the dot product of two vectors.
    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y
    }

    /// Z component of the 3D cross product.
    pub fn cross(self, rhs: Self) -> f32 {
        self.x * rhs.y - self.y * rhs.x
    }

    /// Computes the distance between two points.
    pub fn distance(self, rhs: Self) -> f32 {
        (self - rhs).length()
    }

    /// Angle of the vector in radians, measured from the +X axis.
    pub fn direction(self) -> f32 {
        self.y.atan2(self.x)
    }

    /// Creates a unit vector pointing in the given direction (angle in radians).
    pub fn from_angle(angle: f32) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    /// Linearly interpolates between two vectors.
    pub fn lerp(self, rhs: Self, t: f32) -> Self {
        Self::new(
            self.x + (rhs.x - self.x) * t,
            self.y + (rhs.y - self.y) * t,
        )
    }

    pub fn to_glam(&self) -> GlamVec2 {
        GlamVec2::new(self.x, self.y)
    }
}

impl From<(f32, f32)> for Vec2 {
    fn from(value: (f32, f32)) -> Self {
        Self {
            x: value.0,
            y: value.1,
        }
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<f32> for Vec2 {
    type Output = Self;

    fn div(self, rhs: f32) -> Self::Output {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}

impl Poolable for Vec2 {
    type Args = (f32, f32);

    fn create((x, y): Self::Args) -> Self {
        Self::new(x, y)
    }

    fn reset(&mut self, (x, y): Self::Args) {
        self.set(x, y);
    }
}

/// 2x3 affine matrix.
///
/// ```text
/// | a  c  tx |
/// | b  d  ty |
/// ```
///
/// `a`/`b` is the transformed X basis, `c`/`d` the transformed Y basis and
/// `tx`/`ty` the translation. Every in-place operation right-multiplies, so a
/// sequence `translate, rotate, scale` yields `M * T * R * S`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Matrix {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn new(a: f32, b: f32, c: f32, d: f32, tx: f32, ty: f32) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub fn set_identity(&mut self) {
        *self = Self::IDENTITY;
    }

    pub fn translate(&mut self, x: f32, y: f32) {
        self.tx += self.a * x + self.c * y;
        self.ty += self.b * x + self.d * y;
    }

    /// Rotates by `radians` around the local origin.
    pub fn rotate(&mut self, radians: f32) {
        let (sr, cr) = radians.sin_cos();
        let (a, b, c, d) = (self.a, self.b, self.c, self.d);

        self.a = a * cr + c * sr;
        self.b = b * cr + d * sr;
        self.c = c * cr - a * sr;
        self.d = d * cr - b * sr;
    }

    pub fn scale(&mut self, x: f32, y: f32) {
        self.a *= x;
        self.b *= x;
        self.c *= y;
        self.d *= y;
    }

    /// Skews by the given angles (radians): a local point `(px, py)` maps to
    /// `(px + tan(x) * py, tan(y) * px + py)` before the existing transform.
    pub fn skew(&mut self, x: f32, y: f32) {
        let tan_x = x.tan();
        let tan_y = y.tan();
        let (a, b, c, d) = (self.a, self.b, self.c, self.d);

        self.a = a + c * tan_y;
        self.b = b + d * tan_y;
        self.c = a * tan_x + c;
        self.d = b * tan_x + d;
    }

    /// Returns `self * rhs`.
    pub fn multiply(&self, rhs: &Matrix) -> Matrix {
        Matrix {
            a: self.a * rhs.a + self.c * rhs.b,
            b: self.b * rhs.a + self.d * rhs.b,
            c: self.a * rhs.c + self.c * rhs.d,
            d: self.b * rhs.c + self.d * rhs.d,
            tx: self.a * rhs.tx + self.c * rhs.ty + self.tx,
            ty: self.b * rhs.tx + self.d * rhs.ty + self.ty,
        }
    }

    /// Transforms a point.
    pub fn apply(&self, point: Vec2) -> Vec2 {
        Vec2::new(
            point.x * self.a + point.y * self.c + self.tx,
            point.x * self.b + point.y * self.d + self.ty,
        )
    }

    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    /// Returns `None` for singular matrices.
    pub fn invert(&self) -> Option<Matrix> {
        let det = self.determinant();
        if det == 0.0 {
            return None;
        }

        Some(Matrix {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            tx: (self.c * self.ty - self.d * self.tx) / det,
            ty: (self.b * self.tx - self.a * self.ty) / det,
        })
    }

    pub fn translation(&self) -> Vec2 {
        Vec2::new(self.tx, self.ty)
    }

    /// Rotation of the X basis vector.
    pub fn rotation(&self) -> f32 {
        self.b.atan2(self.a)
    }

    /// Lengths of the two basis vectors.
    pub fn scale_factors(&self) -> Vec2 {
        Vec2::new(
            (self.a * self.a + self.b * self.b).sqrt(),
            (self.c * self.c + self.d * self.d).sqrt(),
        )
    }

    pub fn to_glam(&self) -> Affine2 {
        Affine2::from_mat2_translation(
            Mat2::from_cols(GlamVec2::new(self.a, self.b), GlamVec2::new(self.c, self.d)),
            GlamVec2::new(self.tx, self.ty),
        )
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Poolable for Matrix {
    type Args = Option<Matrix>;

    fn create(args: Self::Args) -> Self {
        args.unwrap_or(Self::IDENTITY)
    }

    fn reset(&mut self, args: Self::Args) {
        *self = args.unwrap_or(Self::IDENTITY);
    }
}

/// RGBA color with components in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);
    pub const RED: Self = Self::rgba(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::rgba(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::rgba(0.0, 0.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn set(&mut self, r: f32, g: f32, b: f32, a: f32) {
        *self = Self::rgba(r, g, b, a);
    }

    /// Parses `#rrggbb` or `#rrggbbaa` (leading `#` optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if (hex.len() != 6 && hex.len() != 8) || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| {
            u8::from_str_radix(hex.get(i..i + 2)?, 16)
                .ok()
                .map(|v| v as f32 / 255.0)
        };
        let a = if hex.len() == 8 { channel(6)? } else { 1.0 };
        Some(Self::rgba(channel(0)?, channel(2)?, channel(4)?, a))
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<[f32; 4]> for Color {
    fn from(v: [f32; 4]) -> Self {
        Self::rgba(v[0], v[1], v[2], v[3])
    }
}

impl Poolable for Color {
    type Args = (f32, f32, f32, f32);

    fn create((r, g, b, a): Self::Args) -> Self {
        Self::rgba(r, g, b, a)
    }

    fn reset(&mut self, (r, g, b, a): Self::Args) {
        self.set(r, g, b, a);
    }
}

/// Axis-aligned rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn set(&mut self, x: f32, y: f32, w: f32, h: f32) {
        *self = Self::new(x, y, w, h);
    }

    /// Offsets `self` by `outer`'s origin and clamps its size to `outer`.
    /// Used to resolve a region that is relative to an atlas sub-rectangle.
    pub fn clip(&self, outer: &Rect) -> Rect {
        Rect::new(
            outer.x + self.x,
            outer.y + self.y,
            self.w.min(outer.w),
            self.h.min(outer.h),
        )
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.w
            && point.y >= self.y
            && point.y <= self.y + self.h
    }

    /// Corners in clockwise screen order starting at the origin.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            Vec2::new(self.x, self.y),
            Vec2::new(self.x + self.w, self.y),
            Vec2::new(self.x + self.w, self.y + self.h),
            Vec2::new(self.x, self.y + self.h),
        ]
    }
}

impl Poolable for Rect {
    type Args = (f32, f32, f32, f32);

    fn create((x, y, w, h): Self::Args) -> Self {
        Self::new(x, y, w, h)
    }

    fn reset(&mut self, (x, y, w, h): Self::Args) {
        self.set(x, y, w, h);
    }
}
