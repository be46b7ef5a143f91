use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use gltf::{Semantic, Texture};
use preview_common::{
    scene::{
        ChannelRole, LoadedMaterial, LoadedMesh, LoadedModel, LoadedPrimitive, LoadedTexture,
        SceneNode, TextureImage,
    },
    transform::Transform,
    Vertex,
};
use thiserror::Error;

/// Deeper node hierarchies are rejected instead of recursing further.
const MAX_NODE_DEPTH: usize = 128;

#[derive(Debug, Error)]
pub enum GltfLoadError {
    #[error(transparent)]
    Gltf(#[from] gltf::Error),
    #[error("node {0} is its own ancestor or has several parents")]
    NodeCycle(usize),
    #[error("node hierarchy is deeper than {MAX_NODE_DEPTH} levels")]
    TooDeep,
}

/// Loads a `.gltf` or `.glb` file. Its materials are used as they are.
///
/// Only self-contained files work, buffers and images must be embedded.
pub fn load_gltf(bytes: &[u8], source_name: &str) -> Result<SceneNode, GltfLoadError> {
    let (document, buffers, images) = gltf::import_slice(bytes)?;
    let mut loading_data = SceneLoadingData::new(buffers, images);

    let mut root = SceneNode::new(source_name);
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next());
    if let Some(scene) = scene {
        for node in scene.nodes() {
            root.children.push(load_node(&mut loading_data, &node, 0)?);
        }
    }
    Ok(root)
}

struct SceneLoadingData {
    buffers: Vec<gltf::buffer::Data>,
    images: Vec<gltf::image::Data>,
    /// Decoded images by glTF image index, shared between materials.
    textures: HashMap<usize, Arc<LoadedTexture>>,
    /// Node indices already placed in the tree.
    visited_nodes: HashSet<usize>,
}

impl SceneLoadingData {
    fn new(buffers: Vec<gltf::buffer::Data>, images: Vec<gltf::image::Data>) -> Self {
        Self {
            buffers,
            images,
            textures: HashMap::new(),
            visited_nodes: HashSet::new(),
        }
    }
}

fn load_node(
    loading_data: &mut SceneLoadingData,
    node: &gltf::Node<'_>,
    depth: usize,
) -> Result<SceneNode, GltfLoadError> {
    if depth >= MAX_NODE_DEPTH {
        return Err(GltfLoadError::TooDeep);
    }
    if !loading_data.visited_nodes.insert(node.index()) {
        return Err(GltfLoadError::NodeCycle(node.index()));
    }

    let transform = {
        let (position, orientation, scale) = node.transform().decomposed();
        Transform::from_arrays(position, orientation, scale)
    };

    let name = node
        .name()
        .map(str::to_owned)
        .unwrap_or_else(|| format!("node{}", node.index()));
    let mut scene_node = SceneNode {
        name,
        transform,
        model: node.mesh().map(|mesh| load_model(loading_data, &mesh)),
        children: Vec::new(),
    };

    for child in node.children() {
        scene_node
            .children
            .push(load_node(loading_data, &child, depth + 1)?);
    }
    Ok(scene_node)
}

fn load_model(loading_data: &mut SceneLoadingData, mesh: &gltf::Mesh<'_>) -> LoadedModel {
    let mut model = LoadedModel::default();
    // glTF material index to slot of this model
    let mut slots: HashMap<Option<usize>, usize> = HashMap::new();

    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            log::warn!(
                "Skipping {:?} primitive of mesh {}",
                primitive.mode(),
                mesh.index()
            );
            continue;
        }
        let Some(loaded_mesh) = load_mesh(loading_data, &primitive) else {
            continue;
        };

        let material = primitive.material();
        let material_slot = match slots.get(&material.index()) {
            Some(slot) => *slot,
            None => {
                model.materials.push(load_material(loading_data, &material));
                let slot = model.materials.len() - 1;
                slots.insert(material.index(), slot);
                slot
            }
        };

        model.primitives.push(LoadedPrimitive {
            mesh: loaded_mesh,
            material_slot,
        });
    }
    model
}

fn load_material(
    loading_data: &mut SceneLoadingData,
    material: &gltf::Material<'_>,
) -> LoadedMaterial {
    if material.index().is_none() {
        return LoadedMaterial::missing_material();
    }

    let material_pbr = material.pbr_metallic_roughness();
    let emissive_factor = material.emissive_factor();
    let emissivity = material
        .emissive_strength()
        .map(|value| emissive_factor.map(|v| v * value))
        .unwrap_or(emissive_factor)
        .into();

    let base_color = {
        let [r, g, b, _] = material_pbr.base_color_factor();
        [r, g, b].into()
    };

    let mut loaded_material = LoadedMaterial {
        base_color,
        roughness_factor: material_pbr.roughness_factor(),
        metallic_factor: material_pbr.metallic_factor(),
        emissivity,
        transparent: material.alpha_mode() == gltf::material::AlphaMode::Blend,
        ..LoadedMaterial::standard(material.name().unwrap_or_default())
    };

    if let Some(info) = material_pbr.base_color_texture() {
        let texture = load_texture(loading_data, info.texture());
        loaded_material.set_channel(ChannelRole::BaseColor, texture);
    }
    if let Some(info) = material_pbr.metallic_roughness_texture() {
        let texture = load_texture(loading_data, info.texture());
        loaded_material.set_channel(ChannelRole::Metalness, texture.clone());
        loaded_material.set_channel(ChannelRole::Roughness, texture);
    }
    if let Some(normal_texture) = material.normal_texture() {
        let texture = load_texture(loading_data, normal_texture.texture());
        loaded_material.set_channel(ChannelRole::Normal, texture);
    }
    if let Some(occlusion_texture) = material.occlusion_texture() {
        let texture = load_texture(loading_data, occlusion_texture.texture());
        loaded_material.set_channel(ChannelRole::AmbientOcclusion, texture);
    }
    if let Some(info) = material.emissive_texture() {
        let texture = load_texture(loading_data, info.texture());
        loaded_material.set_channel(ChannelRole::Emissive, texture);
    }

    loaded_material
}

fn load_mesh(
    loading_data: &SceneLoadingData,
    primitive: &gltf::Primitive<'_>,
) -> Option<LoadedMesh> {
    let reader =
        primitive.reader(|buffer| loading_data.buffers.get(buffer.index()).map(|v| &v.0[..]));

    let Some(positions) = reader.read_positions() else {
        log::warn!("Skipping primitive without {:?}", Semantic::Positions);
        return None;
    };
    let normals: Box<dyn Iterator<Item = [f32; 3]>> = match reader.read_normals() {
        Some(normals) => Box::new(normals),
        None => Box::new(std::iter::repeat([0.0f32; 3])),
    };
    let tex_coords: Box<dyn Iterator<Item = [f32; 2]>> = match reader.read_tex_coords(0) {
        Some(read_tex_coords) => Box::new(read_tex_coords.into_f32()),
        None => Box::new(std::iter::repeat([0.0f32; 2])),
    };

    let vertices: Vec<Vertex> = positions
        .zip(normals.zip(tex_coords))
        .map(|(position, (normal, uv))| Vertex {
            position,
            normal,
            uv,
        })
        .collect();

    let indices = reader
        .read_indices()
        .map(|indices| indices.into_u32().collect())
        .unwrap_or_else(|| (0..(vertices.len() as u32)).collect());

    Some(LoadedMesh { vertices, indices })
}

fn load_texture(loading_data: &mut SceneLoadingData, texture: Texture<'_>) -> Arc<LoadedTexture> {
    let image_index = texture.source().index();
    let name = texture
        .source()
        .name()
        .map(str::to_owned)
        .unwrap_or_else(|| format!("image{image_index}"));

    loading_data
        .textures
        .entry(image_index)
        .or_insert_with(|| {
            let image = match loading_data.images.get(image_index) {
                Some(image) => TextureImage::new(
                    image.width,
                    image.height,
                    gltf_pixels_to_rgba8(&image.pixels, image.format),
                ),
                None => TextureImage::missing_texture(),
            };
            Arc::new(LoadedTexture::new(name, Arc::new(image)))
        })
        .clone()
}

/// Converts any glTF pixel format to 8-bit RGBA.
/// 16-bit channels keep their high byte, float channels are clamped to `[0, 1]`.
fn gltf_pixels_to_rgba8(pixels: &[u8], format: gltf::image::Format) -> Vec<u8> {
    use gltf::image::Format;

    let (channels, bytes_per_channel) = match format {
        Format::R8 => (1, 1),
        Format::R8G8 => (2, 1),
        Format::R8G8B8 => (3, 1),
        Format::R8G8B8A8 => return pixels.to_vec(),
        Format::R16 => (1, 2),
        Format::R16G16 => (2, 2),
        Format::R16G16B16 => (3, 2),
        Format::R16G16B16A16 => (4, 2),
        Format::R32G32B32FLOAT => (3, 4),
        Format::R32G32B32A32FLOAT => (4, 4),
    };

    let channel_value = |bytes: &[u8]| -> u8 {
        match bytes_per_channel {
            1 => bytes[0],
            // little endian, the high byte is the second one
            2 => bytes[1],
            _ => {
                let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                (value.clamp(0.0, 1.0) * 255.0).round() as u8
            }
        }
    };

    pixels
        .chunks_exact(channels * bytes_per_channel)
        .flat_map(|pixel| {
            let mut values = pixel.chunks_exact(bytes_per_channel).map(channel_value);
            let first = values.next().unwrap_or(0);
            match channels {
                // grayscale
                1 => [first, first, first, 255],
                // grayscale + alpha
                2 => [first, first, first, values.next().unwrap_or(255)],
                _ => [
                    first,
                    values.next().unwrap_or(0),
                    values.next().unwrap_or(0),
                    values.next().unwrap_or(255),
                ],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A single triangle with one material, buffer embedded as a data URI.
    fn triangle_gltf() -> String {
        let mut buffer = Vec::new();
        for value in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
        for index in [0u16, 1, 2] {
            buffer.extend_from_slice(&index.to_le_bytes());
        }
        buffer.extend_from_slice(&[0, 0]);

        let encoded = base64_encode(&buffer);
        format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [{{ "name": "Tri", "mesh": 0, "translation": [0, 0, -2] }}],
  "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0 }}, "indices": 1, "material": 0 }}] }}],
  "materials": [{{ "name": "skin_mat", "pbrMetallicRoughness": {{ "baseColorFactor": [1, 0, 0, 1] }} }}],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0] }},
    {{ "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }}
  ],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 6 }}
  ],
  "buffers": [{{ "byteLength": {}, "uri": "data:application/octet-stream;base64,{}" }}]
}}"#,
            buffer.len(),
            encoded
        )
    }

    fn base64_encode(bytes: &[u8]) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        let mut out = String::new();
        for chunk in bytes.chunks(3) {
            let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
            let n = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
            for i in 0..4 {
                if i <= chunk.len() {
                    out.push(ALPHABET[(n >> (18 - 6 * i) & 63) as usize] as char);
                } else {
                    out.push('=');
                }
            }
        }
        out
    }

    #[test]
    fn default_scene_is_unwrapped_into_the_node_tree() {
        let root = load_gltf(triangle_gltf().as_bytes(), "tri.gltf").unwrap();

        assert_eq!(root.name, "tri.gltf");
        assert_eq!(root.children.len(), 1);
        let node = &root.children[0];
        assert_eq!(node.name, "Tri");
        assert_eq!(node.transform.position.z, -2.0);

        let model = node.model.as_ref().unwrap();
        assert_eq!(model.vertex_count(), 3);
        assert_eq!(model.primitives[0].mesh.indices, vec![0, 1, 2]);
        assert_eq!(model.materials[0].name, "skin_mat");
        assert_eq!(model.materials[0].base_color, ultraviolet::Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn invalid_documents_are_errors() {
        assert!(load_gltf(b"{ not json", "broken.gltf").is_err());
    }

    #[test]
    fn node_cycles_are_errors() {
        let cyclic = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "nodes": [0] }],
  "nodes": [{ "name": "a", "children": [0] }]
}"#;
        assert!(matches!(
            load_gltf(cyclic.as_bytes(), "loop.gltf"),
            Err(GltfLoadError::NodeCycle(0))
        ));

        let indirect = r#"{
  "asset": { "version": "2.0" },
  "scenes": [{ "nodes": [0] }],
  "nodes": [{ "children": [1] }, { "children": [0] }]
}"#;
        assert!(matches!(
            load_gltf(indirect.as_bytes(), "loop.gltf"),
            Err(GltfLoadError::NodeCycle(0))
        ));
    }

    #[test]
    fn overly_deep_hierarchies_are_errors() {
        let count = MAX_NODE_DEPTH + 10;
        let nodes: Vec<String> = (0..count)
            .map(|i| {
                if i + 1 < count {
                    format!(r#"{{ "children": [{}] }}"#, i + 1)
                } else {
                    "{}".to_string()
                }
            })
            .collect();
        let document = format!(
            r#"{{ "asset": {{ "version": "2.0" }}, "scenes": [{{ "nodes": [0] }}], "nodes": [{}] }}"#,
            nodes.join(", ")
        );

        assert!(matches!(
            load_gltf(document.as_bytes(), "deep.gltf"),
            Err(GltfLoadError::TooDeep)
        ));
    }

    #[test]
    fn pixel_formats_become_rgba8() {
        use gltf::image::Format;

        assert_eq!(gltf_pixels_to_rgba8(&[7], Format::R8), vec![7, 7, 7, 255]);
        assert_eq!(
            gltf_pixels_to_rgba8(&[1, 2, 3], Format::R8G8B8),
            vec![1, 2, 3, 255]
        );
        assert_eq!(
            gltf_pixels_to_rgba8(&[0x34, 0x12, 0xff, 0xff], Format::R16G16),
            vec![0x12, 0x12, 0x12, 0xff]
        );

        let mut float_pixel = Vec::new();
        for value in [2.0f32, 0.5, -1.0] {
            float_pixel.extend_from_slice(&value.to_le_bytes());
        }
        assert_eq!(
            gltf_pixels_to_rgba8(&float_pixel, Format::R32G32B32FLOAT),
            vec![255, 128, 0, 255]
        );
    }
}
