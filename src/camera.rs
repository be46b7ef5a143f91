pub mod framing;

use ultraviolet::{projection, Mat4, Rotor3, Vec3};

use crate::config_loader::CameraConfig;

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub orientation: Rotor3,
    pub settings: CameraSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub z_near: f32,
    pub z_far: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub aspect_ratio: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        (&CameraConfig::default()).into()
    }
}

impl From<&CameraConfig> for CameraSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            z_near: config.z_near,
            z_far: config.z_far,
            fov: config.fov,
            aspect_ratio: config.aspect_ratio,
        }
    }
}

impl Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            settings,
        }
    }

    /// Turns the camera towards `target`, keeping its position.
    pub fn look_at(&mut self, target: Vec3) {
        let direction = target - self.position;
        if direction.mag_sq() <= f32::EPSILON {
            return;
        }
        let direction = direction.normalized();

        self.orientation = if direction.dot(Camera::forward()) < -0.9999 {
            // exactly behind us, the shortest arc is not unique
            Rotor3::from_rotation_xz(std::f32::consts::PI)
        } else {
            Rotor3::from_rotation_between(Camera::forward(), direction)
        };
    }

    pub fn view_direction(&self) -> Vec3 {
        self.orientation * Camera::forward()
    }

    /// Positions the camera
    pub fn view_matrix(&self) -> Mat4 {
        let target = self.position + self.view_direction();
        Mat4::look_at(self.position, target, Camera::up())
    }

    pub fn projection_matrix(&self) -> Mat4 {
        projection::rh_yup::perspective_gl(
            self.settings.fov.to_radians(),
            self.settings.aspect_ratio,
            self.settings.z_near,
            self.settings.z_far,
        )
    }

    /// in world-space
    pub const fn forward() -> Vec3 {
        Vec3::new(0.0, 0.0, -1.0)
    }

    /// in world-space
    pub const fn up() -> Vec3 {
        Vec3::new(0.0, 1.0, 0.0)
    }
}
