use serde::{Deserialize, Serialize};

/// A 4x4 matrix stored column-major, the layout shader uniforms expect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat4(pub [f32; 16]);

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    /// Orthographic projection mapping the box `[left,right]×[bottom,top]×[near,far]`
    /// onto clip space.
    pub fn ortho(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        let lr = 1.0 / (left - right);
        let bt = 1.0 / (bottom - top);
        let nf = 1.0 / (near - far);
        let mut m = [0.0; 16];
        m[0] = -2.0 * lr;
        m[5] = -2.0 * bt;
        m[10] = 2.0 * nf;
        m[12] = (left + right) * lr;
        m[13] = (top + bottom) * bt;
        m[14] = (far + near) * nf;
        m[15] = 1.0;
        Mat4(m)
    }

    /// Post-multiply by a translation.
    pub fn translate(&self, v: [f32; 3]) -> Self {
        let mut out = *self;
        let m = &self.0;
        for row in 0..4 {
            out.0[12 + row] = m[row] * v[0] + m[4 + row] * v[1] + m[8 + row] * v[2] + m[12 + row];
        }
        out
    }

    /// Matrix product `self * rhs`.
    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let a = &self.0;
        let b = &rhs.0;
        let mut out = [0.0; 16];
        for col in 0..4 {
            for row in 0..4 {
                out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
            }
        }
        Mat4(out)
    }

    /// Transform a homogeneous point.
    pub fn transform(&self, p: [f32; 4]) -> [f32; 4] {
        let m = &self.0;
        let mut out = [0.0; 4];
        for (row, value) in out.iter_mut().enumerate() {
            *value = m[row] * p[0] + m[4 + row] * p[1] + m[8 + row] * p[2] + m[12 + row] * p[3];
        }
        out
    }

    /// Columns as nested arrays.
    pub fn to_cols(&self) -> [[f32; 4]; 4] {
        let m = &self.0;
        [
            [m[0], m[1], m[2], m[3]],
            [m[4], m[5], m[6], m[7]],
            [m[8], m[9], m[10], m[11]],
            [m[12], m[13], m[14], m[15]],
        ]
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: [f32; 4], b: [f32; 4]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_unit_square_ortho_maps_to_clip_corners() {
        let proj = Mat4::ortho(0.0, 1.0, 0.0, 1.0, 0.0, 1.0);
        assert!(approx(proj.transform([0.0, 0.0, 0.0, 1.0]), [-1.0, -1.0, -1.0, 1.0]));
        assert!(approx(proj.transform([1.0, 1.0, 0.0, 1.0]), [1.0, 1.0, -1.0, 1.0]));
        assert!(approx(proj.transform([0.5, 0.5, 0.0, 1.0]), [0.0, 0.0, -1.0, 1.0]));
    }

    #[test]
    fn test_zero_translation_is_identity() {
        assert_eq!(Mat4::identity().translate([0.0, 0.0, 0.0]), Mat4::IDENTITY);
    }

    #[test]
    fn test_translate_moves_points() {
        let m = Mat4::identity().translate([0.25, -0.5, 0.0]);
        assert!(approx(m.transform([1.0, 1.0, 0.0, 1.0]), [1.25, 0.5, 0.0, 1.0]));
    }

    #[test]
    fn test_mul_by_identity() {
        let proj = Mat4::ortho(0.0, 1.0, 0.0, 1.0, 0.0, 1.0);
        assert_eq!(proj.mul(&Mat4::IDENTITY), proj);
        assert_eq!(Mat4::IDENTITY.mul(&proj), proj);
    }
}
