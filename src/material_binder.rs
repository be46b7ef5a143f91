//! Reunites loose textures with the materials of a decoded mesh, purely by name.
//!
//! Artists name their files `<material>_<channel>`, e.g. `skin_diffuse.png` for the
//! material `skin_mat`. The rules are fuzzy on purpose and the first matching rule wins.

use std::sync::Arc;

use preview_common::scene::{ChannelRole, LoadedMaterial, LoadedModel, LoadedTexture, SceneNode};

/// The channels one texture fills on one material.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialBinding {
    pub roles: Vec<ChannelRole>,
    pub transparent: bool,
}

impl MaterialBinding {
    fn new(roles: &[ChannelRole]) -> Self {
        Self {
            roles: roles.to_vec(),
            transparent: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Splits a name at its last `_` into a lower-cased `(token, hint)` pair.
/// Without a `_` the token is empty and the hint is the whole name.
fn split_name(name: &str) -> (String, String) {
    let name = name.to_lowercase();
    match name.rfind('_') {
        Some(index) => (name[..index].to_string(), name[index + 1..].to_string()),
        None => (String::new(), name),
    }
}

fn strip_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(index) if index > 0 => &file_name[..index],
        _ => file_name,
    }
}

/// Which channels the texture `texture_hint` fills on a material with `material_hint`.
pub fn channel_roles(material_hint: &str, texture_hint: &str) -> MaterialBinding {
    use ChannelRole::*;

    let material_hint = material_hint.to_lowercase();
    let texture_hint = texture_hint.to_lowercase();
    let texture_is = |keyword: &str| texture_hint.contains(keyword);
    let gated = material_hint.contains("mat");

    if ["colour", "color", "diffuse", "albedo"]
        .into_iter()
        .any(texture_is)
    {
        if material_hint.contains("alpha") {
            MaterialBinding {
                roles: vec![BaseColor, Alpha],
                transparent: true,
            }
        } else {
            MaterialBinding::new(&[BaseColor])
        }
    } else if texture_is("ao") && gated {
        MaterialBinding::new(&[AmbientOcclusion])
    } else if texture_is("metal") && gated {
        MaterialBinding::new(&[Metalness])
    } else if texture_is("normal") && gated {
        MaterialBinding::new(&[Normal])
    } else if texture_is("rough") && gated {
        MaterialBinding::new(&[Roughness])
    } else if texture_is("ms") && gated {
        MaterialBinding::new(&[Roughness, Metalness])
    } else if texture_is("mro") && gated {
        MaterialBinding::new(&[Roughness, Metalness, AmbientOcclusion])
    } else if texture_is("emission") || (texture_is("emissive") && gated) {
        MaterialBinding::new(&[Emissive])
    } else {
        MaterialBinding::default()
    }
}

/// What binding `texture_name` gets on `material_name`, if the names belong together.
pub fn binding_for(material_name: &str, texture_name: &str) -> Option<MaterialBinding> {
    let (material_token, material_hint) = split_name(material_name);
    let (texture_token, texture_hint) = split_name(strip_extension(texture_name));

    if !texture_token.contains(&material_token) {
        return None;
    }
    let binding = channel_roles(&material_hint, &texture_hint);
    (!binding.is_empty()).then_some(binding)
}

/// Rebuilds the material as a plain one and binds every matching texture to it.
/// Later textures overwrite earlier ones on the same channel.
pub fn bind_material(material: &mut LoadedMaterial, textures: &[Arc<LoadedTexture>]) {
    *material = LoadedMaterial::standard(std::mem::take(&mut material.name));

    for texture in textures {
        let Some(binding) = binding_for(&material.name, &texture.name) else {
            continue;
        };
        log::debug!(
            "Binding {} to {} as {:?}",
            texture.name,
            material.name,
            binding.roles
        );
        for role in binding.roles {
            material.set_channel(role, texture.clone());
        }
        if binding.transparent {
            material.transparent = true;
        }
    }
}

pub fn bind_model(model: &mut LoadedModel, textures: &[Arc<LoadedTexture>]) {
    for material in model.materials.iter_mut() {
        bind_material(material, textures);
    }
}

/// Binds the materials of every model in the tree.
pub fn bind(node: &mut SceneNode, textures: &[Arc<LoadedTexture>]) {
    if textures.is_empty() {
        return;
    }
    node.visit_mut(&mut |node| {
        if let Some(model) = node.model.as_mut() {
            bind_model(model, textures);
        }
    });
}
