use std::{fmt, sync::Arc};

use ultraviolet::Vec3;

use super::LoadedTexture;

/// The texture slots of a standard material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelRole {
    BaseColor,
    Alpha,
    AmbientOcclusion,
    Metalness,
    Normal,
    Roughness,
    Emissive,
}

impl ChannelRole {
    pub const ALL: [ChannelRole; 7] = [
        ChannelRole::BaseColor,
        ChannelRole::Alpha,
        ChannelRole::AmbientOcclusion,
        ChannelRole::Metalness,
        ChannelRole::Normal,
        ChannelRole::Roughness,
        ChannelRole::Emissive,
    ];
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelRole::BaseColor => "base-color",
            ChannelRole::Alpha => "alpha",
            ChannelRole::AmbientOcclusion => "ao",
            ChannelRole::Metalness => "metalness",
            ChannelRole::Normal => "normal",
            ChannelRole::Roughness => "roughness",
            ChannelRole::Emissive => "emissive",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LoadedMaterial {
    pub name: String,
    pub base_color: Vec3,
    pub roughness_factor: f32,
    pub metallic_factor: f32,
    pub emissivity: Vec3,
    pub transparent: bool,

    pub base_color_map: Option<Arc<LoadedTexture>>,
    pub alpha_map: Option<Arc<LoadedTexture>>,
    pub ao_map: Option<Arc<LoadedTexture>>,
    pub metalness_map: Option<Arc<LoadedTexture>>,
    pub normal_map: Option<Arc<LoadedTexture>>,
    pub roughness_map: Option<Arc<LoadedTexture>>,
    pub emissive_map: Option<Arc<LoadedTexture>>,
}

impl LoadedMaterial {
    /// A plain white material that keeps only its name.
    pub fn standard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_color: Vec3::one(),
            roughness_factor: 1.0,
            metallic_factor: 0.0,
            emissivity: Vec3::zero(),
            transparent: false,
            base_color_map: None,
            alpha_map: None,
            ao_map: None,
            metalness_map: None,
            normal_map: None,
            roughness_map: None,
            emissive_map: None,
        }
    }

    pub fn missing_material() -> Self {
        Self {
            base_color: Vec3::new(0.8, 0.8, 0.0),
            roughness_factor: 0.0,
            ..Self::standard("")
        }
    }

    fn slot(&self, role: ChannelRole) -> &Option<Arc<LoadedTexture>> {
        match role {
            ChannelRole::BaseColor => &self.base_color_map,
            ChannelRole::Alpha => &self.alpha_map,
            ChannelRole::AmbientOcclusion => &self.ao_map,
            ChannelRole::Metalness => &self.metalness_map,
            ChannelRole::Normal => &self.normal_map,
            ChannelRole::Roughness => &self.roughness_map,
            ChannelRole::Emissive => &self.emissive_map,
        }
    }

    fn slot_mut(&mut self, role: ChannelRole) -> &mut Option<Arc<LoadedTexture>> {
        match role {
            ChannelRole::BaseColor => &mut self.base_color_map,
            ChannelRole::Alpha => &mut self.alpha_map,
            ChannelRole::AmbientOcclusion => &mut self.ao_map,
            ChannelRole::Metalness => &mut self.metalness_map,
            ChannelRole::Normal => &mut self.normal_map,
            ChannelRole::Roughness => &mut self.roughness_map,
            ChannelRole::Emissive => &mut self.emissive_map,
        }
    }

    pub fn channel(&self, role: ChannelRole) -> Option<&Arc<LoadedTexture>> {
        self.slot(role).as_ref()
    }

    pub fn set_channel(&mut self, role: ChannelRole, texture: Arc<LoadedTexture>) {
        *self.slot_mut(role) = Some(texture);
    }

    /// Roles that currently hold a texture, in [`ChannelRole::ALL`] order.
    pub fn bound_channels(&self) -> Vec<ChannelRole> {
        ChannelRole::ALL
            .into_iter()
            .filter(|role| self.slot(*role).is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::TextureImage;

    #[test]
    fn one_texture_can_fill_several_channels() {
        let texture = Arc::new(LoadedTexture::new(
            "body_mro.png",
            Arc::new(TextureImage::missing_texture()),
        ));
        let mut material = LoadedMaterial::standard("body_mat");
        material.set_channel(ChannelRole::Roughness, texture.clone());
        material.set_channel(ChannelRole::Metalness, texture.clone());

        assert_eq!(
            material.bound_channels(),
            vec![ChannelRole::Metalness, ChannelRole::Roughness]
        );
        assert!(Arc::ptr_eq(
            material.channel(ChannelRole::Roughness).unwrap(),
            &texture
        ));
        assert_eq!(Arc::strong_count(&texture), 3);
    }
}
