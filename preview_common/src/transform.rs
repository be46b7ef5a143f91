use std::ops::Mul;

use ultraviolet::{Mat3, Rotor3, Vec3};

#[derive(Clone, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Rotor3,
    pub scale: Vec3,
}

impl Transform {
    pub fn from_arrays(position: [f32; 3], orientation: [f32; 4], scale: [f32; 3]) -> Self {
        Self {
            position: Vec3::from(position),
            orientation: Rotor3::from_quaternion_array(orientation),
            scale: Vec3::from(scale),
        }
    }

    pub fn from_translation(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Euler angles in degrees, applied X first, then Y, then Z.
    pub fn from_euler_degrees(position: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        let rx = Rotor3::from_rotation_yz(rotation.x.to_radians());
        let ry = Rotor3::from_rotation_xz(-rotation.y.to_radians());
        let rz = Rotor3::from_rotation_xy(rotation.z.to_radians());
        Self {
            position,
            orientation: (rz * ry * rx).normalized(),
            scale,
        }
    }

    /// Splits a column-major affine matrix into translation, rotation and scale.
    /// Shear is discarded.
    pub fn from_column_major(m: [f32; 16]) -> Self {
        let column = |i: usize| Vec3::new(m[i * 4], m[i * 4 + 1], m[i * 4 + 2]);
        let (x_axis, y_axis, z_axis) = (column(0), column(1), column(2));
        let scale = Vec3::new(x_axis.mag(), y_axis.mag(), z_axis.mag());

        let orientation = if scale.x > f32::EPSILON && scale.y > f32::EPSILON && scale.z > f32::EPSILON
        {
            Mat3::new(x_axis / scale.x, y_axis / scale.y, z_axis / scale.z)
                .into_rotor3()
                .normalized()
        } else {
            Rotor3::identity()
        };

        Self {
            position: column(3),
            orientation,
            scale,
        }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + (self.orientation * (point * self.scale))
    }

    pub fn scale_uniformly(&mut self, factor: f32) {
        self.scale *= factor;
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            scale: Vec3::one(),
        }
    }
}

impl Mul<Transform> for &Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Self::Output {
        Transform {
            position: self.transform_point(rhs.position),
            orientation: self.orientation * rhs.orientation,
            scale: self.scale * rhs.scale,
        }
    }
}
