//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the SQT transform used by scene entities.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// Homogeneous 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Scale factors below this magnitude are treated as degenerate when
/// decomposing a matrix.
pub const DEGENERATE_SCALE: f32 = 1.0e-8;

/// Scale, rotation and translation (SQT).
///
/// The matrix form applies scale first, then rotation, then translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Scale factors
    pub scale: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Translation in the parent's space
    pub translation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: Vec3::new(1.0, 1.0, 1.0),
            rotation: Quat::identity(),
            translation: Vec3::zeros(),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform from all three components
    pub const fn new(scale: Vec3, rotation: Quat, translation: Vec3) -> Self {
        Self {
            scale,
            rotation,
            translation,
        }
    }

    /// Create a transform from a translation vector
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    /// Create a transform with a uniform scale
    pub fn from_uniform_scale(scale: f32) -> Self {
        Self {
            scale: Vec3::new(scale, scale, scale),
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.translation)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Decompose an affine matrix back into scale, rotation and translation.
    ///
    /// Shear is discarded. A degenerate axis keeps its zero scale and does not
    /// contribute to the recovered rotation.
    pub fn from_matrix(matrix: &Mat4) -> Self {
        let translation = Vec3::new(matrix.m14, matrix.m24, matrix.m34);

        let axis_x = Vec3::new(matrix.m11, matrix.m21, matrix.m31);
        let axis_y = Vec3::new(matrix.m12, matrix.m22, matrix.m32);
        let axis_z = Vec3::new(matrix.m13, matrix.m23, matrix.m33);
        let scale = Vec3::new(axis_x.magnitude(), axis_y.magnitude(), axis_z.magnitude());

        let safe = |s: f32| if s.abs() < DEGENERATE_SCALE { 1.0 } else { s };
        let rotation_matrix = Mat3::from_columns(&[
            axis_x / safe(scale.x),
            axis_y / safe(scale.y),
            axis_z / safe(scale.z),
        ]);
        let rotation = Quat::from_matrix(&rotation_matrix);

        Self {
            scale,
            rotation,
            translation,
        }
    }

    /// Combine this transform with another.
    ///
    /// The result applies `other` first and then `self`, like `self * other`
    /// on the matrix forms. This is exact when `self` has uniform scale or
    /// `other` has no rotation. Otherwise the product contains shear, which
    /// SQT cannot represent, and the result only approximates it.
    pub fn combine(&self, other: &Self) -> Self {
        Self {
            translation: self.translation + self.rotation * self.scale.component_mul(&other.translation),
            rotation: self.rotation * other.rotation,
            scale: self.scale.component_mul(&other.scale),
        }
    }

    /// Get the inverse transform
    pub fn inverse(&self) -> Self {
        let inv_scale = Vec3::new(1.0 / self.scale.x, 1.0 / self.scale.y, 1.0 / self.scale.z);
        let inv_rotation = self.rotation.inverse();
        let inv_translation = inv_scale.component_mul(&(inv_rotation * -self.translation));

        Self {
            translation: inv_translation,
            rotation: inv_rotation,
            scale: inv_scale,
        }
    }

    /// Local forward direction (-Z rotated by this transform)
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::new(0.0, 0.0, -1.0)
    }

    /// Local right direction (+X rotated by this transform)
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::new(1.0, 0.0, 0.0)
    }

    /// Local up direction (+Y rotated by this transform)
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::new(0.0, 1.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_matrix_round_trip() {
        let original = Transform::new(
            Vec3::new(2.0, 3.0, 0.5),
            Quat::from_euler_angles(0.3, -1.1, 0.7),
            Vec3::new(10.0, -4.0, 2.5),
        );

        let reconstructed = Transform::from_matrix(&original.to_matrix());

        assert_relative_eq!(reconstructed.translation, original.translation, epsilon = EPSILON);
        assert_relative_eq!(reconstructed.scale, original.scale, epsilon = EPSILON);
        assert_relative_eq!(reconstructed.to_matrix(), original.to_matrix(), epsilon = 1e-4);
    }

    #[test]
    fn test_combine_matches_matrix_product() {
        let parent = Transform::new(
            Vec3::new(2.0, 2.0, 2.0),
            Quat::from_euler_angles(0.0, 0.5, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
        );
        let child = Transform::new(
            Vec3::new(1.0, 1.0, 1.0),
            Quat::from_euler_angles(0.2, 0.0, 0.0),
            Vec3::new(0.0, 3.0, 0.0),
        );

        let combined = parent.combine(&child);

        assert_relative_eq!(
            combined.to_matrix(),
            parent.to_matrix() * child.to_matrix(),
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_combine_with_non_uniform_scale_and_no_rotation_is_exact() {
        let parent = Transform::new(
            Vec3::new(1.0, 3.0, 0.5),
            Quat::from_euler_angles(0.3, -0.7, 0.1),
            Vec3::new(-2.0, 4.0, 1.0),
        );
        let child = Transform::new(Vec3::new(2.0, 1.0, 4.0), Quat::identity(), Vec3::new(1.0, -1.0, 2.0));

        assert_relative_eq!(
            parent.combine(&child).to_matrix(),
            parent.to_matrix() * child.to_matrix(),
            epsilon = 1e-4
        );

        // A rotated child under non-uniform scale shears; only the origin
        // still lands in the right place.
        let rotated = Transform::new(Vec3::new(1.0, 1.0, 1.0), Quat::from_euler_angles(0.0, 0.0, 0.8), Vec3::zeros());
        let combined = parent.combine(&rotated);
        assert_relative_eq!(combined.translation, parent.translation, epsilon = 1e-5);
        assert!(!approx::relative_eq!(
            combined.to_matrix(),
            parent.to_matrix() * rotated.to_matrix(),
            epsilon = 1e-3
        ));
    }

    #[test]
    fn test_inverse_combines_to_identity() {
        let transform = Transform::new(
            Vec3::new(2.0, 2.0, 2.0),
            Quat::from_euler_angles(0.4, 0.1, -0.3),
            Vec3::new(5.0, 1.0, -2.0),
        );

        let should_be_identity = transform.combine(&transform.inverse());

        assert_relative_eq!(should_be_identity.translation, Vec3::zeros(), epsilon = 1e-4);
        assert_relative_eq!(should_be_identity.scale, Vec3::new(1.0, 1.0, 1.0), epsilon = EPSILON);
    }

    #[test]
    fn test_directions_follow_rotation() {
        let transform = Transform::identity();
        assert_relative_eq!(transform.forward(), Vec3::new(0.0, 0.0, -1.0), epsilon = EPSILON);
        assert_relative_eq!(transform.right(), Vec3::new(1.0, 0.0, 0.0), epsilon = EPSILON);
        assert_relative_eq!(transform.up(), Vec3::new(0.0, 1.0, 0.0), epsilon = EPSILON);

        let turned = Transform {
            rotation: Quat::from_axis_angle(&Vec3::y_axis(), std::f32::consts::FRAC_PI_2),
            ..Transform::default()
        };
        assert_relative_eq!(turned.forward(), Vec3::new(-1.0, 0.0, 0.0), epsilon = EPSILON);
    }
}
