use std::collections::HashMap;

use preview_common::{
    scene::{LoadedMesh, LoadedModel, LoadedPrimitive, SceneNode},
    Vertex,
};
use thiserror::Error;
use ultraviolet::Vec3;

#[derive(Debug, Error)]
pub enum ObjError {
    #[error("file is not valid UTF-8")]
    Encoding,
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

/// Position, texture coordinate and normal index of one face corner.
type CornerKey = (usize, Option<usize>, Option<usize>);

/// One `o`/`g` group of the file, becomes one child node.
struct Group {
    name: String,
    model: LoadedModel,
    /// Primitive index per material slot.
    primitive_of_slot: HashMap<usize, usize>,
    /// Deduplicated vertices per primitive.
    corner_indices: Vec<HashMap<CornerKey, u32>>,
}

impl Group {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: LoadedModel::default(),
            primitive_of_slot: HashMap::new(),
            corner_indices: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.model.primitives.is_empty()
    }

    fn primitive_for(&mut self, material_name: &str) -> usize {
        let slot = self.model.material_slot(material_name);
        *self.primitive_of_slot.entry(slot).or_insert_with(|| {
            self.model.primitives.push(LoadedPrimitive {
                mesh: LoadedMesh::default(),
                material_slot: slot,
            });
            self.corner_indices.push(HashMap::new());
            self.model.primitives.len() - 1
        })
    }
}

#[derive(Default)]
struct ObjData {
    positions: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    normals: Vec<[f32; 3]>,
}

/// Parses a Wavefront OBJ file. Every `o`/`g` group becomes a child node, every
/// `usemtl` a material slot that only carries the material name.
pub fn load_obj(bytes: &[u8], source_name: &str) -> Result<SceneNode, ObjError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ObjError::Encoding)?;

    let mut data = ObjData::default();
    let mut groups: Vec<Group> = Vec::new();
    let mut current = Group::new(source_name);
    let mut material_name = String::new();

    for (line_index, line) in text.lines().enumerate() {
        let line_number = line_index + 1;
        let syntax = |message: &str| ObjError::Syntax {
            line: line_number,
            message: message.to_string(),
        };

        let line = line.split('#').next().unwrap_or_default().trim();
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };

        match keyword {
            "v" => data.positions.push(parse_floats(words, &syntax)?),
            "vn" => data.normals.push(parse_floats(words, &syntax)?),
            "vt" => {
                let values: Vec<f32> = parse_float_list(words, &syntax)?;
                if values.is_empty() {
                    return Err(syntax("texture coordinate without values"));
                }
                data.uvs
                    .push([values[0], values.get(1).copied().unwrap_or(0.0)]);
            }
            "f" => {
                let corners = words
                    .map(|word| parse_corner(word, &data, &syntax))
                    .collect::<Result<Vec<_>, _>>()?;
                if corners.len() < 3 {
                    log::debug!("Ignoring degenerate face on line {line_number}");
                    continue;
                }
                add_face(&mut current, &material_name, &corners, &data);
            }
            "o" | "g" => {
                let name = words.collect::<Vec<_>>().join(" ");
                let previous = std::mem::replace(&mut current, Group::new(name));
                if !previous.is_empty() {
                    groups.push(previous);
                }
            }
            "usemtl" => {
                material_name = words.collect::<Vec<_>>().join(" ");
            }
            // mtllib, s, l, p and friends
            _ => {}
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let mut root = SceneNode::new(source_name);
    root.children = groups
        .into_iter()
        .map(|group| SceneNode::with_model(group.name, group.model))
        .collect();
    Ok(root)
}

fn parse_float_list<'a>(
    words: impl Iterator<Item = &'a str>,
    syntax: &impl Fn(&str) -> ObjError,
) -> Result<Vec<f32>, ObjError> {
    words
        .map(|word| word.parse::<f32>().map_err(|_| syntax("invalid number")))
        .collect()
}

fn parse_floats<'a>(
    words: impl Iterator<Item = &'a str>,
    syntax: &impl Fn(&str) -> ObjError,
) -> Result<[f32; 3], ObjError> {
    let values = parse_float_list(words, syntax)?;
    match values[..] {
        [x, y, z, ..] => Ok([x, y, z]),
        _ => Err(syntax("expected three numbers")),
    }
}

/// Resolves a 1-based or negative (relative) index.
fn resolve_index(
    word: &str,
    count: usize,
    syntax: &impl Fn(&str) -> ObjError,
) -> Result<usize, ObjError> {
    let index: i64 = word.parse().map_err(|_| syntax("invalid index"))?;
    let resolved = match index {
        0 => return Err(syntax("index 0 is not allowed")),
        i if i > 0 => i - 1,
        i => count as i64 + i,
    };
    if resolved < 0 || resolved as usize >= count {
        return Err(syntax("index out of range"));
    }
    Ok(resolved as usize)
}

fn parse_corner(
    word: &str,
    data: &ObjData,
    syntax: &impl Fn(&str) -> ObjError,
) -> Result<CornerKey, ObjError> {
    let mut parts = word.split('/');
    let position = resolve_index(parts.next().unwrap_or_default(), data.positions.len(), syntax)?;
    let uv = match parts.next() {
        Some(part) if !part.is_empty() => Some(resolve_index(part, data.uvs.len(), syntax)?),
        _ => None,
    };
    let normal = match parts.next() {
        Some(part) if !part.is_empty() => Some(resolve_index(part, data.normals.len(), syntax)?),
        _ => None,
    };
    Ok((position, uv, normal))
}

/// Fan-triangulates a polygon into the group's primitive for `material_name`.
fn add_face(group: &mut Group, material_name: &str, corners: &[CornerKey], data: &ObjData) {
    let face_normal = {
        let p = |i: usize| Vec3::from(data.positions[corners[i].0]);
        let normal = (p(1) - p(0)).cross(p(2) - p(0));
        if normal.mag_sq() > 0.0 {
            normal.normalized()
        } else {
            Vec3::zero()
        }
    };

    let primitive_index = group.primitive_for(material_name);
    let mesh = &mut group.model.primitives[primitive_index].mesh;
    let known = &mut group.corner_indices[primitive_index];

    let corner_indices: Vec<u32> = corners
        .iter()
        .map(|&key| {
            *known.entry(key).or_insert_with(|| {
                let (position, uv, normal) = key;
                mesh.vertices.push(Vertex {
                    position: data.positions[position],
                    normal: normal.map_or(face_normal.into(), |n| data.normals[n]),
                    uv: uv.map_or([0.0; 2], |t| data.uvs[t]),
                });
                mesh.vertices.len() as u32 - 1
            })
        })
        .collect();

    for i in 1..corner_indices.len() - 1 {
        mesh.indices
            .extend([corner_indices[0], corner_indices[i], corner_indices[i + 1]]);
    }
}
