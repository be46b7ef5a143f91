use std::collections::HashMap;

use preview_common::{
    scene::{LoadedMesh, LoadedModel, LoadedPrimitive, SceneNode},
    transform::Transform,
    Vertex,
};
use roxmltree::{Document, Node};
use thiserror::Error;
use ultraviolet::{Bivec3, Rotor3, Vec3};

#[derive(Debug, Error)]
pub enum ColladaError {
    #[error("file is not valid UTF-8")]
    Encoding,
    #[error(transparent)]
    Xml(#[from] roxmltree::Error),
    #[error("{0}")]
    Invalid(String),
}

/// A `<source>`: flat floats read `stride` at a time.
struct Source {
    values: Vec<f32>,
    stride: usize,
}

impl Source {
    fn get<const N: usize>(&self, index: usize) -> Option<[f32; N]> {
        let start = index.checked_mul(self.stride)?;
        let values = self.values.get(start..start + N)?;
        let mut out = [0.0; N];
        out.copy_from_slice(values);
        Some(out)
    }
}

/// One `<triangles>` or `<polylist>` with the material symbol it is bound through.
struct GeometryPrimitive {
    material_symbol: String,
    mesh: LoadedMesh,
}

/// Loads a COLLADA (`.dae`) document: its geometries and the node hierarchy of
/// the first visual scene.
pub fn load_collada(bytes: &[u8], source_name: &str) -> Result<SceneNode, ColladaError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ColladaError::Encoding)?;
    let document = Document::parse(text)?;
    let collada = document.root_element();
    if collada.tag_name().name() != "COLLADA" {
        return Err(ColladaError::Invalid(format!(
            "root element is <{}>",
            collada.tag_name().name()
        )));
    }

    let material_names: HashMap<&str, &str> = descendants_named(collada, "material")
        .filter_map(|material| {
            let id = material.attribute("id")?;
            Some((id, material.attribute("name").unwrap_or(id)))
        })
        .collect();

    let mut geometries: HashMap<&str, Vec<GeometryPrimitive>> = HashMap::new();
    // document order
    let mut geometry_ids = Vec::new();
    for geometry in descendants_named(collada, "geometry") {
        let (Some(id), Some(mesh)) = (geometry.attribute("id"), child(geometry, "mesh")) else {
            continue;
        };
        if geometries.insert(id, load_geometry(mesh)?).is_none() {
            geometry_ids.push(id);
        }
    }

    let mut root = SceneNode::new(source_name);
    match visual_scene(collada) {
        Some(scene) => {
            for node in children_named(scene, "node") {
                root.children
                    .push(load_node(node, &geometries, &material_names));
            }
        }
        None => {
            // Geometry libraries without a scene still deserve a preview.
            for id in geometry_ids {
                let Some(primitives) = geometries.get(id) else {
                    continue;
                };
                let model = build_model(primitives, &HashMap::new(), &material_names);
                root.children.push(SceneNode::with_model(id, model));
            }
        }
    }
    Ok(root)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn children_named<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

fn descendants_named<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.descendants()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

/// Strips the `#` of a local URL reference.
fn local_reference(url: &str) -> &str {
    url.strip_prefix('#').unwrap_or(url)
}

fn parse_numbers<T: std::str::FromStr>(text: Option<&str>) -> Result<Vec<T>, ColladaError> {
    text.unwrap_or_default()
        .split_whitespace()
        .map(|word| {
            word.parse()
                .map_err(|_| ColladaError::Invalid(format!("invalid number {word:?}")))
        })
        .collect()
}

/// The scene referenced by `<scene><instance_visual_scene>`, or else the first one.
fn visual_scene<'a, 'input>(collada: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    let referenced = child(collada, "scene")
        .and_then(|scene| child(scene, "instance_visual_scene"))
        .and_then(|instance| instance.attribute("url"))
        .map(local_reference);

    let mut scenes = descendants_named(collada, "visual_scene");
    match referenced {
        Some(id) => descendants_named(collada, "visual_scene")
            .find(|scene| scene.attribute("id") == Some(id))
            .or_else(|| scenes.next()),
        None => scenes.next(),
    }
}

fn load_geometry(mesh: Node<'_, '_>) -> Result<Vec<GeometryPrimitive>, ColladaError> {
    let mut sources = HashMap::new();
    for source in children_named(mesh, "source") {
        let Some(id) = source.attribute("id") else {
            continue;
        };
        let values = parse_numbers(child(source, "float_array").and_then(|a| a.text()))?;
        let stride = descendants_named(source, "accessor")
            .next()
            .and_then(|accessor| accessor.attribute("stride"))
            .and_then(|stride| stride.parse().ok())
            .unwrap_or(1usize)
            .max(1);
        sources.insert(id, Source { values, stride });
    }

    // <vertices> renames the position source
    let mut vertex_positions = HashMap::new();
    for vertices in children_named(mesh, "vertices") {
        let position = children_named(vertices, "input")
            .find(|input| input.attribute("semantic") == Some("POSITION"))
            .and_then(|input| input.attribute("source"));
        if let (Some(id), Some(position)) = (vertices.attribute("id"), position) {
            vertex_positions.insert(id, local_reference(position));
        }
    }

    let mut primitives = Vec::new();
    for element in mesh.children().filter(|c| c.is_element()) {
        let kind = element.tag_name().name();
        if kind != "triangles" && kind != "polylist" {
            continue;
        }

        let mut offset_count = 0;
        let mut position_input = None;
        let mut normal_input = None;
        let mut uv_input = None;
        for input in children_named(element, "input") {
            let offset: usize = input
                .attribute("offset")
                .and_then(|o| o.parse().ok())
                .unwrap_or(0);
            offset_count = offset_count.max(offset + 1);
            let source = local_reference(input.attribute("source").unwrap_or_default());
            match input.attribute("semantic") {
                Some("VERTEX") => {
                    let source = vertex_positions.get(source).copied().unwrap_or(source);
                    position_input = sources.get(source).map(|s| (offset, s));
                }
                Some("NORMAL") => normal_input = sources.get(source).map(|s| (offset, s)),
                Some("TEXCOORD") if uv_input.is_none() => {
                    uv_input = sources.get(source).map(|s| (offset, s))
                }
                _ => {}
            }
        }
        let Some((position_offset, positions)) = position_input else {
            log::warn!("Skipping <{kind}> without positions");
            continue;
        };

        let indices: Vec<usize> = parse_numbers(child(element, "p").and_then(|p| p.text()))?;
        let corner_count = indices.len() / offset_count.max(1);
        let polygon_sizes: Vec<usize> = if kind == "polylist" {
            parse_numbers(child(element, "vcount").and_then(|v| v.text()))?
        } else {
            vec![3; corner_count / 3]
        };

        let mut mesh = LoadedMesh::default();
        let mut corner = 0;
        for size in polygon_sizes {
            if corner + size > corner_count {
                return Err(ColladaError::Invalid(format!("<{kind}> has too few indices")));
            }
            let first = mesh.vertices.len() as u32;
            for c in corner..corner + size {
                let index = |offset: usize| indices[c * offset_count + offset];
                let position = positions
                    .get::<3>(index(position_offset))
                    .ok_or_else(|| ColladaError::Invalid("position index out of range".into()))?;
                mesh.vertices.push(Vertex {
                    position,
                    normal: normal_input
                        .and_then(|(offset, source)| source.get::<3>(index(offset)))
                        .unwrap_or([0.0; 3]),
                    uv: uv_input
                        .and_then(|(offset, source)| source.get::<2>(index(offset)))
                        .unwrap_or([0.0; 2]),
                });
            }
            for i in 1..(size as u32).saturating_sub(1) {
                mesh.indices.extend([first, first + i, first + i + 1]);
            }
            corner += size;
        }

        primitives.push(GeometryPrimitive {
            material_symbol: element.attribute("material").unwrap_or_default().to_string(),
            mesh,
        });
    }
    Ok(primitives)
}

/// Material names are resolved through the instance's `<bind_material>` first,
/// then the symbol is tried as a material id.
fn build_model(
    primitives: &[GeometryPrimitive],
    symbol_targets: &HashMap<&str, &str>,
    material_names: &HashMap<&str, &str>,
) -> LoadedModel {
    let mut model = LoadedModel::default();
    for primitive in primitives {
        let symbol = primitive.material_symbol.as_str();
        let material_id = symbol_targets.get(symbol).copied().unwrap_or(symbol);
        let name = material_names.get(material_id).copied().unwrap_or(material_id);
        let material_slot = model.material_slot(name);
        model.primitives.push(LoadedPrimitive {
            mesh: primitive.mesh.clone(),
            material_slot,
        });
    }
    model
}

fn load_node(
    node: Node<'_, '_>,
    geometries: &HashMap<&str, Vec<GeometryPrimitive>>,
    material_names: &HashMap<&str, &str>,
) -> SceneNode {
    let name = node
        .attribute("name")
        .or_else(|| node.attribute("id"))
        .unwrap_or_default();
    let mut scene_node = SceneNode::new(name);
    scene_node.transform = node_transform(node);

    let mut model = LoadedModel::default();
    for instance in children_named(node, "instance_geometry") {
        let Some(primitives) = instance
            .attribute("url")
            .and_then(|url| geometries.get(local_reference(url)))
        else {
            continue;
        };

        let symbol_targets: HashMap<&str, &str> = descendants_named(instance, "instance_material")
            .filter_map(|m| Some((m.attribute("symbol")?, local_reference(m.attribute("target")?))))
            .collect();

        let instance_model = build_model(primitives, &symbol_targets, material_names);
        merge_model(&mut model, instance_model);
    }
    if !model.primitives.is_empty() {
        scene_node.model = Some(model);
    }

    for child_node in children_named(node, "node") {
        scene_node
            .children
            .push(load_node(child_node, geometries, material_names));
    }
    scene_node
}

fn merge_model(target: &mut LoadedModel, source: LoadedModel) {
    for mut primitive in source.primitives {
        let name = &source.materials[primitive.material_slot].name;
        primitive.material_slot = target.material_slot(name);
        target.primitives.push(primitive);
    }
}

/// Combines the node's transform elements in document order.
fn node_transform(node: Node<'_, '_>) -> Transform {
    let mut transform = Transform::default();
    for element in node.children().filter(|c| c.is_element()) {
        let Ok(values) = parse_numbers::<f32>(element.text()) else {
            continue;
        };
        let local = match (element.tag_name().name(), values.as_slice()) {
            ("matrix", [..]) if values.len() == 16 => {
                // COLLADA matrices are written row by row
                let mut column_major = [0.0; 16];
                for row in 0..4 {
                    for column in 0..4 {
                        column_major[column * 4 + row] = values[row * 4 + column];
                    }
                }
                Transform::from_column_major(column_major)
            }
            ("translate", [x, y, z]) => Transform::from_translation(Vec3::new(*x, *y, *z)),
            ("scale", [x, y, z]) => Transform {
                scale: Vec3::new(*x, *y, *z),
                ..Default::default()
            },
            ("rotate", [x, y, z, angle]) => {
                let axis = Vec3::new(*x, *y, *z);
                if axis.mag_sq() == 0.0 {
                    continue;
                }
                Transform {
                    orientation: Rotor3::from_angle_plane(
                        angle.to_radians(),
                        Bivec3::from_normalized_axis(axis.normalized()),
                    ),
                    ..Default::default()
                }
            }
            _ => continue,
        };
        transform = &transform * local;
    }
    transform
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD_DAE: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<COLLADA xmlns="http://www.collada.org/2005/11/COLLADASchema" version="1.4.1">
  <library_materials>
    <material id="skin-material" name="skin_mat"/>
  </library_materials>
  <library_geometries>
    <geometry id="quad-mesh" name="Quad">
      <mesh>
        <source id="quad-positions">
          <float_array id="quad-positions-array" count="12">0 0 0 1 0 0 1 1 0 0 1 0</float_array>
          <technique_common>
            <accessor source="#quad-positions-array" count="4" stride="3"/>
          </technique_common>
        </source>
        <vertices id="quad-vertices">
          <input semantic="POSITION" source="#quad-positions"/>
        </vertices>
        <polylist material="skin-symbol" count="1">
          <input semantic="VERTEX" source="#quad-vertices" offset="0"/>
          <vcount>4</vcount>
          <p>0 1 2 3</p>
        </polylist>
      </mesh>
    </geometry>
  </library_geometries>
  <library_visual_scenes>
    <visual_scene id="Scene">
      <node id="Root" name="Root">
        <translate>0 0 5</translate>
        <node id="Body" name="Body">
          <matrix>2 0 0 1  0 2 0 0  0 0 2 0  0 0 0 1</matrix>
          <instance_geometry url="#quad-mesh">
            <bind_material>
              <technique_common>
                <instance_material symbol="skin-symbol" target="#skin-material"/>
              </technique_common>
            </bind_material>
          </instance_geometry>
        </node>
      </node>
    </visual_scene>
  </library_visual_scenes>
  <scene>
    <instance_visual_scene url="#Scene"/>
  </scene>
</COLLADA>"##;

    #[test]
    fn loads_node_hierarchy_with_bound_material_names() {
        let root = load_collada(QUAD_DAE.as_bytes(), "quad.dae").unwrap();

        assert_eq!(root.children.len(), 1);
        let scene_root = &root.children[0];
        assert_eq!(scene_root.name, "Root");
        assert!(scene_root.model.is_none());
        assert_eq!(scene_root.transform.position, Vec3::new(0.0, 0.0, 5.0));

        let body = &scene_root.children[0];
        assert!((body.transform.position - Vec3::new(1.0, 0.0, 0.0)).mag() < 1e-5);
        assert!((body.transform.scale - Vec3::broadcast(2.0)).mag() < 1e-5);

        let model = body.model.as_ref().unwrap();
        assert_eq!(model.materials[0].name, "skin_mat");
        assert_eq!(model.primitives[0].mesh.vertices.len(), 4);
        assert_eq!(model.primitives[0].mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn world_positions_combine_node_transforms() {
        let root = load_collada(QUAD_DAE.as_bytes(), "quad.dae").unwrap();
        let mut max = Vec3::broadcast(f32::MIN);
        root.for_each_world_position(|p| max = max.max_by_component(p));

        assert!((max - Vec3::new(3.0, 2.0, 5.0)).mag() < 1e-5);
    }

    #[test]
    fn geometry_libraries_without_a_scene_keep_document_order() {
        let geometry = QUAD_DAE
            .split_once("<library_geometries>")
            .and_then(|(_, rest)| rest.split_once("</library_geometries>"))
            .unwrap()
            .0;
        let ids = ["wheel", "axle", "body", "door", "seat", "mirror", "hood", "trunk"];
        let library: String = ids
            .iter()
            .map(|id| geometry.replace("quad-mesh", id))
            .collect();
        let document = format!(
            "<COLLADA><library_geometries>{library}</library_geometries></COLLADA>"
        );

        let root = load_collada(document.as_bytes(), "parts.dae").unwrap();

        let names: Vec<_> = root.children.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, ids);
        assert!(root.children.iter().all(|node| node.model.is_some()));
    }

    #[test]
    fn rejects_non_collada_xml() {
        assert!(matches!(
            load_collada(b"<svg></svg>", "a.dae"),
            Err(ColladaError::Invalid(_))
        ));
        assert!(matches!(
            load_collada(b"<COLLADA>", "a.dae"),
            Err(ColladaError::Xml(_))
        ));
    }
}
