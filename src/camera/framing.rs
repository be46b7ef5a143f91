//! One-shot camera placement for a freshly displayed asset.

use preview_common::{scene::SceneNode, RenderableAsset};
use ultraviolet::Vec3;

use crate::config_loader::FramingConfig;

use super::Camera;

/// World-space bounds of a mesh scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingGeometry {
    /// Center of both the box and the sphere
    pub center: Vec3,
    /// Half the box diagonal
    pub radius: f32,
    /// Edge lengths of the axis aligned box
    pub size: Vec3,
}

impl BoundingGeometry {
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), point| {
            (min.min_by_component(point), max.max_by_component(point))
        });

        let size = max - min;
        Some(Self {
            center: (min + max) * 0.5,
            radius: size.mag() * 0.5,
            size,
        })
    }

    /// `None` for trees without any vertex.
    pub fn of_node(node: &SceneNode) -> Option<Self> {
        let mut points = Vec::new();
        node.for_each_world_position(|point| points.push(point));
        Self::from_points(points)
    }

    pub fn max_dimension(&self) -> f32 {
        self.size.component_max()
    }
}

/// What [`frame`] did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Framing {
    /// No 3-D bounds, the camera got the configured default pose.
    DefaultPose,
    Fitted {
        /// Bounds after rescaling
        bounds: BoundingGeometry,
        /// Uniform factor applied to the scene root, 1 if it was left alone.
        scale_factor: f32,
        distance: f32,
    },
}

/// Distance at which a sphere of `radius` fits into a vertical field of view.
pub fn camera_distance(radius: f32, fov_degrees: f32, multiplier: f32) -> f32 {
    (radius / (fov_degrees.to_radians() / 2.0).sin()).abs() * multiplier
}

/// Factor that brings models that are too small or too large to a comfortable size.
fn rescale_factor(max_dimension: f32, config: &FramingConfig) -> Option<f32> {
    if max_dimension <= f32::EPSILON || !max_dimension.is_finite() {
        None
    } else if max_dimension < config.tiny_model_threshold {
        Some(config.tiny_model_target_size / max_dimension)
    } else if max_dimension > config.large_model_threshold {
        Some(config.large_model_target_size / max_dimension)
    } else {
        None
    }
}

/// Places the camera in front of the asset, looking at its center.
///
/// Meshes far outside the comfortable size range are rescaled uniformly first.
/// Flat images and meshes without geometry get the default pose instead.
pub fn frame(renderable: &mut RenderableAsset, camera: &mut Camera, config: &FramingConfig) -> Framing {
    let Some(root_node) = renderable.root_node_mut() else {
        return default_pose(camera, config);
    };
    let Some(mut bounds) = BoundingGeometry::of_node(root_node) else {
        return default_pose(camera, config);
    };

    let mut scale_factor = 1.0;
    if let Some(factor) = rescale_factor(bounds.max_dimension(), config) {
        log::debug!(
            "Rescaling {} by {factor} (longest side {})",
            root_node.name,
            bounds.max_dimension()
        );
        root_node.transform.scale_uniformly(factor);
        scale_factor = factor;
        match BoundingGeometry::of_node(root_node) {
            Some(rescaled) => bounds = rescaled,
            None => return default_pose(camera, config),
        }
    }

    let distance = camera_distance(bounds.radius, camera.settings.fov, config.distance_multiplier);
    if distance <= f32::EPSILON || !distance.is_finite() {
        return default_pose(camera, config);
    }

    camera.position = bounds.center + Vec3::new(0.0, 0.0, distance);
    camera.look_at(bounds.center);

    Framing::Fitted {
        bounds,
        scale_factor,
        distance,
    }
}

fn default_pose(camera: &mut Camera, config: &FramingConfig) -> Framing {
    camera.position = config.default_camera_position;
    camera.look_at(config.default_camera_target);
    Framing::DefaultPose
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use preview_common::{
        scene::{LoadedMesh, LoadedModel, LoadedPrimitive, TextureImage},
        transform::Transform,
    };

    use super::*;
    use crate::camera::CameraSettings;

    fn cube_scene(edge: f32, offset: Vec3) -> RenderableAsset {
        let model = LoadedModel {
            materials: Vec::new(),
            primitives: vec![LoadedPrimitive {
                mesh: LoadedMesh::new_unit_cube(),
                material_slot: 0,
            }],
        };
        let mut cube = SceneNode::with_model("cube", model);
        cube.transform = Transform {
            position: offset,
            scale: Vec3::broadcast(edge),
            ..Default::default()
        };
        let mut root_node = SceneNode::new("cube.obj");
        root_node.children.push(cube);

        RenderableAsset::MeshScene {
            root_node,
            source_name: "cube.obj".into(),
        }
    }

    fn camera() -> Camera {
        Camera::new(CameraSettings::default())
    }

    fn max_dimension(renderable: &RenderableAsset) -> f32 {
        BoundingGeometry::of_node(renderable.root_node().unwrap())
            .unwrap()
            .max_dimension()
    }

    #[test]
    fn unit_cube_is_framed_on_the_z_axis() {
        let mut renderable = cube_scene(1.0, Vec3::zero());
        let mut camera = camera();
        let config = FramingConfig::default();

        let framing = frame(&mut renderable, &mut camera, &config);

        let Framing::Fitted { bounds, scale_factor, distance } = framing else {
            panic!("expected a fitted camera");
        };
        assert_eq!(scale_factor, 1.0);
        assert!((bounds.radius - 3f32.sqrt() / 2.0).abs() < 1e-5);
        assert!(distance > 0.0);
        assert!((camera.position - Vec3::new(0.0, 0.0, distance)).mag() < 1e-5);
        assert!((camera.view_direction() - Vec3::new(0.0, 0.0, -1.0)).mag() < 1e-4);

        let expected = bounds.radius / (75f32.to_radians() / 2.0).sin() * 1.75;
        assert!((distance - expected).abs() < 1e-4);
    }

    #[test]
    fn framed_bounds_fit_on_screen() {
        let mut renderable = cube_scene(2.0, Vec3::new(1.0, -2.0, 0.5));
        let mut camera = camera();

        let framing = frame(&mut renderable, &mut camera, &FramingConfig::default());

        let Framing::Fitted { bounds, .. } = framing else {
            panic!("expected a fitted camera");
        };
        let view_projection = camera.projection_matrix() * camera.view_matrix();
        for offset in [
            Vec3::unit_x(),
            -Vec3::unit_x(),
            Vec3::unit_y(),
            -Vec3::unit_y(),
        ] {
            let point = view_projection.transform_point3(bounds.center + offset * bounds.radius);
            assert!(point.x.abs() < 1.0 && point.y.abs() < 1.0, "{point:?}");
            assert!(point.z > -1.0 && point.z < 1.0, "{point:?}");
        }
    }

    #[test]
    fn distance_is_inversely_proportional_to_half_fov_sine() {
        let narrow = camera_distance(1.0, 30.0, 1.0);
        let wide = camera_distance(1.0, 90.0, 1.0);
        let ratio = narrow / wide;
        let expected = 45f32.to_radians().sin() / 15f32.to_radians().sin();
        assert!((ratio - expected).abs() < 1e-4);
    }

    #[test]
    fn tiny_models_are_scaled_up_to_one_unit() {
        let mut renderable = cube_scene(0.1, Vec3::new(3.0, 0.0, 0.0));
        let framing = frame(&mut renderable, &mut camera(), &FramingConfig::default());

        assert!((max_dimension(&renderable) - 1.0).abs() < 1e-4);
        let Framing::Fitted { bounds, scale_factor, .. } = framing else {
            panic!("expected a fitted camera");
        };
        assert!((scale_factor - 10.0).abs() < 1e-3);
        // the center moves with the rescaled geometry
        assert!((bounds.center.x - 30.0).abs() < 1e-3);
    }

    #[test]
    fn huge_models_are_scaled_down_to_seven_units() {
        let mut renderable = cube_scene(50.0, Vec3::zero());
        frame(&mut renderable, &mut camera(), &FramingConfig::default());
        assert!((max_dimension(&renderable) - 7.0).abs() < 1e-3);
    }

    #[test]
    fn comfortable_models_keep_their_size() {
        let mut renderable = cube_scene(4.0, Vec3::zero());
        frame(&mut renderable, &mut camera(), &FramingConfig::default());
        assert!((max_dimension(&renderable) - 4.0).abs() < 1e-4);
    }

    #[test]
    fn textures_get_the_default_pose() {
        let mut renderable = RenderableAsset::Texture {
            image: Arc::new(TextureImage::missing_texture()),
            source_name: "a.png".into(),
        };
        let mut camera = camera();
        let config = FramingConfig::default();

        assert_eq!(frame(&mut renderable, &mut camera, &config), Framing::DefaultPose);
        assert_eq!(camera.position, config.default_camera_position);

        let mut empty = RenderableAsset::MeshScene {
            root_node: SceneNode::new("empty.obj"),
            source_name: "empty.obj".into(),
        };
        assert_eq!(frame(&mut empty, &mut camera, &config), Framing::DefaultPose);
    }
}
