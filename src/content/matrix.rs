//! Six-value transformation matrices as written by the `cm` and `Tm`
//! operators.

use crate::utils::format_number;
use serde::{Deserialize, Serialize};

/// A 2D transformation matrix.
///
/// PDF uses matrices of the form:
/// ```text
/// [ a  b  0 ]
/// [ c  d  0 ]
/// [ e  f  1 ]
/// ```
///
/// Where (a,b,c,d) define scaling/rotation/skewing and (e,f) define translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    /// Horizontal scaling component
    pub a: f64,
    /// Rotation/skew component
    pub b: f64,
    /// Rotation/skew component
    pub c: f64,
    /// Vertical scaling component
    pub d: f64,
    /// Horizontal translation
    pub e: f64,
    /// Vertical translation
    pub f: f64,
}

impl Matrix {
    /// Create a matrix from its six operands in operator order.
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Create an identity matrix.
    ///
    /// # Examples
    ///
    /// ```
    /// use pdf_patch::content::Matrix;
    ///
    /// let m = Matrix::identity();
    /// assert_eq!(m.a, 1.0);
    /// assert_eq!(m.d, 1.0);
    /// assert_eq!(m.e, 0.0);
    /// ```
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    /// Build from an operand slice; `None` unless exactly six values.
    pub fn from_operands(values: &[f64]) -> Option<Self> {
        match *values {
            [a, b, c, d, e, f] => Some(Self::new(a, b, c, d, e, f)),
            _ => None,
        }
    }

    /// Shift the translation part.
    ///
    /// ```
    /// use pdf_patch::content::Matrix;
    ///
    /// let m = Matrix::new(1.0, 0.0, 0.0, 1.0, 100.0, 200.0).translated(5.0, -10.0);
    /// assert_eq!((m.e, m.f), (105.0, 190.0));
    /// ```
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            e: self.e + dx,
            f: self.f + dy,
            ..*self
        }
    }

    /// Scale the diagonal, leaving skew and translation alone.
    pub fn rescaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            a: self.a * sx,
            d: self.d * sy,
            ..*self
        }
    }

    /// Multiply this matrix with another matrix.
    ///
    /// The result represents first applying `self`, then applying `other`.
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Transform a point using this matrix.
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// Operand text without the operator, e.g. `1 0 0 1 10.5 20`.
    pub fn operands(&self, precision: usize) -> String {
        [self.a, self.b, self.c, self.d, self.e, self.f]
            .iter()
            .map(|v| format_number(*v, precision))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `cm` operator text, e.g. `2 0 0 2 0 0 cm`.
    pub fn to_cm(&self, precision: usize) -> String {
        format!("{} cm", self.operands(precision))
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}
