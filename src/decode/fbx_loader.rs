//! Binary FBX reader. Only the parts needed for a preview are understood:
//! geometry, the model hierarchy with local transforms, and material names.

use std::{
    collections::{HashMap, HashSet},
    io::Read,
};

use flate2::read::ZlibDecoder;
use preview_common::{
    scene::{LoadedMesh, LoadedModel, LoadedPrimitive, SceneNode},
    transform::Transform,
    Vertex,
};
use thiserror::Error;
use ultraviolet::Vec3;

const MAGIC: &[u8] = b"Kaydara FBX Binary  \0\x1a\0";
const ASCII_MAGIC: &[u8] = b"; FBX";
/// Files from this version on use 64 bit record offsets.
const WIDE_OFFSETS_VERSION: u32 = 7500;
/// Record nesting in real files stays in the single digits.
const MAX_RECORD_DEPTH: usize = 64;
const MAX_MODEL_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum FbxError {
    #[error("ASCII FBX files are not supported")]
    Ascii,
    #[error("missing FBX header")]
    NotFbx,
    #[error("unexpected end of data at byte {0}")]
    UnexpectedEof(usize),
    #[error("unknown property type {0:?} at byte {1}")]
    UnknownProperty(char, usize),
    #[error("array decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("file has no Objects section")]
    MissingObjects,
    #[error("records are nested deeper than {MAX_RECORD_DEPTH} levels")]
    RecordsTooDeep,
    #[error("model hierarchy is deeper than {MAX_MODEL_DEPTH} levels")]
    ModelsTooDeep,
}

#[derive(Debug, Clone, PartialEq)]
enum Property {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Raw(Vec<u8>),
    FloatArray(Vec<f64>),
    IntegerArray(Vec<i64>),
}

impl Property {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Property::Integer(value) => Some(*value),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Property::Float(value) => Some(*value),
            Property::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Property::String(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct FbxNode {
    name: String,
    properties: Vec<Property>,
    children: Vec<FbxNode>,
}

impl FbxNode {
    fn child(&self, name: &str) -> Option<&FbxNode> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FbxNode> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn property(&self, index: usize) -> Option<&Property> {
        self.properties.get(index)
    }

    fn id(&self) -> Option<i64> {
        self.property(0).and_then(Property::as_i64)
    }

    /// Object names are stored as `Name\0\x01Class`.
    fn object_name(&self) -> String {
        let raw = self.property(1).and_then(Property::as_str).unwrap_or_default();
        raw.split("\0\x01").next().unwrap_or_default().to_string()
    }

    fn float_array(&self, child: &str) -> Vec<f64> {
        match self.child(child).and_then(|c| c.property(0)) {
            Some(Property::FloatArray(values)) => values.clone(),
            _ => Vec::new(),
        }
    }

    fn integer_array(&self, child: &str) -> Vec<i64> {
        match self.child(child).and_then(|c| c.property(0)) {
            Some(Property::IntegerArray(values)) => values.clone(),
            _ => Vec::new(),
        }
    }

    fn string_child(&self, child: &str) -> Option<&str> {
        self.child(child)
            .and_then(|c| c.property(0))
            .and_then(Property::as_str)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
    wide_offsets: bool,
}

impl<'a> Reader<'a> {
    fn take(&mut self, length: usize) -> Result<&'a [u8], FbxError> {
        let end = self
            .position
            .checked_add(length)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(FbxError::UnexpectedEof(self.position))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FbxError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn u8(&mut self) -> Result<u8, FbxError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, FbxError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn offset(&mut self) -> Result<u64, FbxError> {
        if self.wide_offsets {
            Ok(u64::from_le_bytes(self.array()?))
        } else {
            Ok(self.u32()? as u64)
        }
    }

    /// Reads one node record. `None` is the null record that ends a list.
    fn node(&mut self, depth: usize) -> Result<Option<FbxNode>, FbxError> {
        if depth >= MAX_RECORD_DEPTH {
            return Err(FbxError::RecordsTooDeep);
        }
        let end_offset = self.offset()? as usize;
        let property_count = self.offset()?;
        let _property_list_length = self.offset()?;
        let name_length = self.u8()? as usize;

        if end_offset == 0 {
            return Ok(None);
        }
        // records never point backwards
        if end_offset > self.bytes.len() || end_offset < self.position + name_length {
            return Err(FbxError::UnexpectedEof(end_offset));
        }

        let name = String::from_utf8_lossy(self.take(name_length)?).into_owned();
        let mut node = FbxNode {
            name,
            ..Default::default()
        };
        for _ in 0..property_count {
            node.properties.push(self.property()?);
        }
        while self.position < end_offset {
            match self.node(depth + 1)? {
                Some(child) => node.children.push(child),
                None => break,
            }
        }
        self.position = end_offset;
        Ok(Some(node))
    }

    fn property(&mut self) -> Result<Property, FbxError> {
        let type_position = self.position;
        let type_code = self.u8()? as char;
        let property = match type_code {
            'C' => Property::Bool(self.u8()? != 0),
            'Y' => Property::Integer(i16::from_le_bytes(self.array()?) as i64),
            'I' => Property::Integer(i32::from_le_bytes(self.array()?) as i64),
            'L' => Property::Integer(i64::from_le_bytes(self.array()?)),
            'F' => Property::Float(f32::from_le_bytes(self.array()?) as f64),
            'D' => Property::Float(f64::from_le_bytes(self.array()?)),
            'S' | 'R' => {
                let length = self.u32()? as usize;
                let data = self.take(length)?;
                if type_code == 'S' {
                    Property::String(String::from_utf8_lossy(data).into_owned())
                } else {
                    Property::Raw(data.to_vec())
                }
            }
            'f' => Property::FloatArray(self.array_values(4, |b| {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64
            })?),
            'd' => Property::FloatArray(self.array_values(8, |b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            })?),
            'i' => Property::IntegerArray(self.array_values(4, |b| {
                i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64
            })?),
            'l' => Property::IntegerArray(self.array_values(8, |b| {
                i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            })?),
            'b' => Property::IntegerArray(self.array_values(1, |b| b[0] as i64)?),
            other => return Err(FbxError::UnknownProperty(other, type_position)),
        };
        Ok(property)
    }

    /// Reads an array property, inflating it if it is zlib compressed.
    fn array_values<T>(
        &mut self,
        element_size: usize,
        convert: impl Fn(&[u8]) -> T,
    ) -> Result<Vec<T>, FbxError> {
        let length = self.u32()? as usize;
        let encoding = self.u32()?;
        let compressed_length = self.u32()? as usize;
        let expected_length = length
            .checked_mul(element_size)
            .ok_or(FbxError::UnexpectedEof(self.position))?;

        let raw = if encoding == 1 {
            let compressed = self.take(compressed_length)?;
            let mut data = Vec::with_capacity(expected_length.min(compressed_length * 16));
            ZlibDecoder::new(compressed)
                .take(expected_length as u64)
                .read_to_end(&mut data)?;
            data
        } else {
            self.take(expected_length)?.to_vec()
        };

        if raw.len() != expected_length {
            return Err(FbxError::UnexpectedEof(self.position));
        }
        Ok(raw.chunks_exact(element_size).map(convert).collect())
    }
}

fn parse_document(bytes: &[u8]) -> Result<FbxNode, FbxError> {
    if bytes.starts_with(ASCII_MAGIC) {
        return Err(FbxError::Ascii);
    }
    if !bytes.starts_with(MAGIC) {
        return Err(FbxError::NotFbx);
    }

    let mut reader = Reader {
        bytes,
        position: MAGIC.len(),
        wide_offsets: false,
    };
    let version = reader.u32()?;
    reader.wide_offsets = version >= WIDE_OFFSETS_VERSION;
    log::debug!("FBX version {version}");

    let mut document = FbxNode::default();
    while reader.position < bytes.len() {
        match reader.node(0)? {
            Some(node) => document.children.push(node),
            // the footer follows
            None => break,
        }
    }
    Ok(document)
}

/// A `Model` object and what is connected to it.
struct ModelObject<'a> {
    node: &'a FbxNode,
    geometries: Vec<i64>,
    materials: Vec<i64>,
    children: Vec<i64>,
}

pub fn load_fbx(bytes: &[u8], source_name: &str) -> Result<SceneNode, FbxError> {
    let document = parse_document(bytes)?;
    let objects = document.child("Objects").ok_or(FbxError::MissingObjects)?;

    let geometries: HashMap<i64, &FbxNode> = objects
        .children_named("Geometry")
        .filter_map(|node| Some((node.id()?, node)))
        .collect();
    let materials: HashMap<i64, String> = objects
        .children_named("Material")
        .filter_map(|node| Some((node.id()?, node.object_name())))
        .collect();
    let mut models: HashMap<i64, ModelObject<'_>> = objects
        .children_named("Model")
        .filter_map(|node| {
            let model = ModelObject {
                node,
                geometries: Vec::new(),
                materials: Vec::new(),
                children: Vec::new(),
            };
            Some((node.id()?, model))
        })
        .collect();

    // Object-object connections, in file order: (child, parent)
    let mut root_models = Vec::new();
    let connections = document.child("Connections");
    for connection in connections.into_iter().flat_map(|c| c.children_named("C")) {
        if connection.property(0).and_then(Property::as_str) != Some("OO") {
            continue;
        }
        let (Some(child), Some(parent)) = (
            connection.property(1).and_then(Property::as_i64),
            connection.property(2).and_then(Property::as_i64),
        ) else {
            continue;
        };

        if parent == 0 {
            if models.contains_key(&child) {
                root_models.push(child);
            }
            continue;
        }
        let child_is_model = models.contains_key(&child);
        let Some(parent_model) = models.get_mut(&parent) else {
            continue;
        };
        if geometries.contains_key(&child) {
            parent_model.geometries.push(child);
        } else if materials.contains_key(&child) {
            parent_model.materials.push(child);
        } else if child_is_model {
            parent_model.children.push(child);
        }
    }

    let mut root = SceneNode::new(source_name);
    let mut visited = HashSet::new();
    for id in root_models {
        if let Some(node) = build_node(id, &models, &geometries, &materials, &mut visited, 0)? {
            root.children.push(node);
        }
    }
    Ok(root)
}

fn build_node(
    id: i64,
    models: &HashMap<i64, ModelObject<'_>>,
    geometries: &HashMap<i64, &FbxNode>,
    materials: &HashMap<i64, String>,
    visited: &mut HashSet<i64>,
    depth: usize,
) -> Result<Option<SceneNode>, FbxError> {
    if depth >= MAX_MODEL_DEPTH {
        return Err(FbxError::ModelsTooDeep);
    }
    if !visited.insert(id) {
        log::warn!("FBX model {id} is connected twice, skipping");
        return Ok(None);
    }
    let Some(model_object) = models.get(&id) else {
        return Ok(None);
    };

    let mut node = SceneNode::new(model_object.node.object_name());
    node.transform = local_transform(model_object.node);

    if !model_object.geometries.is_empty() {
        let mut model = LoadedModel::default();
        let slots: Vec<usize> = model_object
            .materials
            .iter()
            .map(|material_id| {
                let name = materials.get(material_id).map(String::as_str).unwrap_or("");
                model.material_slot(name)
            })
            .collect();

        for geometry_id in model_object.geometries.iter() {
            if let Some(geometry) = geometries.get(geometry_id) {
                add_geometry(&mut model, geometry, &slots);
            }
        }
        node.model = Some(model);
    }

    for child_id in model_object.children.iter() {
        if let Some(child) =
            build_node(*child_id, models, geometries, materials, visited, depth + 1)?
        {
            node.children.push(child);
        }
    }
    Ok(Some(node))
}

fn local_transform(model: &FbxNode) -> Transform {
    let mut translation = Vec3::zero();
    let mut rotation = Vec3::zero();
    let mut scale = Vec3::one();

    let properties = model.child("Properties70");
    for entry in properties.into_iter().flat_map(|p| p.children_named("P")) {
        let vector = || {
            let value = |i: usize| entry.property(i).and_then(Property::as_f64).unwrap_or(0.0) as f32;
            Vec3::new(value(4), value(5), value(6))
        };
        match entry.property(0).and_then(Property::as_str) {
            Some("Lcl Translation") => translation = vector(),
            Some("Lcl Rotation") => rotation = vector(),
            Some("Lcl Scaling") => scale = vector(),
            _ => {}
        }
    }
    Transform::from_euler_degrees(translation, rotation, scale)
}

/// Triangulates the polygons of a `Geometry` object into the model's primitives,
/// one primitive per material slot.
fn add_geometry(model: &mut LoadedModel, geometry: &FbxNode, slots: &[usize]) {
    let coordinates = geometry.float_array("Vertices");
    let positions: Vec<[f32; 3]> = coordinates
        .chunks_exact(3)
        .map(|c| [c[0] as f32, c[1] as f32, c[2] as f32])
        .collect();
    let polygon_vertices = geometry.integer_array("PolygonVertexIndex");

    let (material_per_polygon, same_material) = match geometry.child("LayerElementMaterial") {
        Some(layer) => (
            layer.integer_array("Materials"),
            layer.string_child("MappingInformationType") != Some("ByPolygon"),
        ),
        None => (Vec::new(), true),
    };

    // a negative index ends a polygon and encodes its last vertex as !index
    let mut polygons: Vec<Vec<usize>> = Vec::new();
    let mut current = Vec::new();
    for &raw in polygon_vertices.iter() {
        let (index, last) = if raw < 0 { (!raw, true) } else { (raw, false) };
        match usize::try_from(index).ok().filter(|&i| i < positions.len()) {
            Some(index) => current.push(index),
            None => {
                log::warn!("FBX polygon index {index} out of range");
                current.clear();
                continue;
            }
        }
        if last {
            polygons.push(std::mem::take(&mut current));
        }
    }

    let mut primitive_of_slot: HashMap<usize, usize> = HashMap::new();
    for (polygon_index, polygon) in polygons.iter().enumerate() {
        if polygon.len() < 3 {
            continue;
        }
        let local_material = if same_material {
            material_per_polygon.first().copied().unwrap_or(0)
        } else {
            material_per_polygon.get(polygon_index).copied().unwrap_or(0)
        };
        let slot = match usize::try_from(local_material).ok().and_then(|i| slots.get(i)) {
            Some(slot) => *slot,
            None => model.material_slot(""),
        };

        let primitive_index = *primitive_of_slot.entry(slot).or_insert_with(|| {
            model.primitives.push(LoadedPrimitive {
                mesh: LoadedMesh::default(),
                material_slot: slot,
            });
            model.primitives.len() - 1
        });
        let mesh = &mut model.primitives[primitive_index].mesh;

        let p = |i: usize| Vec3::from(positions[polygon[i]]);
        let normal = (p(1) - p(0)).cross(p(2) - p(0));
        let normal: [f32; 3] = if normal.mag_sq() > 0.0 {
            normal.normalized().into()
        } else {
            [0.0; 3]
        };

        let first = mesh.vertices.len() as u32;
        mesh.vertices.extend(polygon.iter().map(|&index| Vertex {
            position: positions[index],
            normal,
            uv: [0.0; 2],
        }));
        for i in 1..polygon.len() as u32 - 1 {
            mesh.indices.extend([first, first + i, first + i + 1]);
        }
    }
}

#[cfg(test)]
mod tests {
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    use super::*;

    enum TestProperty {
        Long(i64),
        Double(f64),
        Str(&'static str),
        Doubles(Vec<f64>, bool),
        Ints(Vec<i32>),
    }

    struct TestNode {
        name: &'static str,
        properties: Vec<TestProperty>,
        children: Vec<TestNode>,
    }

    fn node(name: &'static str, properties: Vec<TestProperty>, children: Vec<TestNode>) -> TestNode {
        TestNode {
            name,
            properties,
            children,
        }
    }

    fn encode_property(property: &TestProperty) -> Vec<u8> {
        let mut out = Vec::new();
        match property {
            TestProperty::Long(value) => {
                out.push(b'L');
                out.extend(value.to_le_bytes());
            }
            TestProperty::Double(value) => {
                out.push(b'D');
                out.extend(value.to_le_bytes());
            }
            TestProperty::Str(value) => {
                out.push(b'S');
                out.extend((value.len() as u32).to_le_bytes());
                out.extend(value.as_bytes());
            }
            TestProperty::Doubles(values, compress) => {
                out.push(b'd');
                let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                let data = if *compress {
                    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                    encoder.write_all(&raw).unwrap();
                    encoder.finish().unwrap()
                } else {
                    raw
                };
                out.extend((values.len() as u32).to_le_bytes());
                out.extend((*compress as u32).to_le_bytes());
                out.extend((data.len() as u32).to_le_bytes());
                out.extend(data);
            }
            TestProperty::Ints(values) => {
                out.push(b'i');
                out.extend((values.len() as u32).to_le_bytes());
                out.extend(0u32.to_le_bytes());
                out.extend((values.len() as u32 * 4).to_le_bytes());
                out.extend(values.iter().flat_map(|v| v.to_le_bytes()));
            }
        }
        out
    }

    /// Writes a 7400 style record with 32 bit offsets.
    fn write_node(out: &mut Vec<u8>, node: &TestNode) {
        let start = out.len();
        let properties: Vec<u8> = node.properties.iter().flat_map(encode_property).collect();
        out.extend(0u32.to_le_bytes());
        out.extend((node.properties.len() as u32).to_le_bytes());
        out.extend((properties.len() as u32).to_le_bytes());
        out.push(node.name.len() as u8);
        out.extend(node.name.as_bytes());
        out.extend(properties);
        for child in node.children.iter() {
            write_node(out, child);
        }
        if !node.children.is_empty() {
            out.extend([0u8; 13]);
        }
        let end = out.len() as u32;
        out[start..start + 4].copy_from_slice(&end.to_le_bytes());
    }

    fn fbx_file(nodes: &[TestNode]) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.extend(7400u32.to_le_bytes());
        for node in nodes {
            write_node(&mut out, node);
        }
        out.extend([0u8; 13]);
        out
    }

    fn quad_scene(compress: bool) -> Vec<u8> {
        use TestProperty::*;

        let geometry = node(
            "Geometry",
            vec![Long(10), Str("Quad\0\x01Geometry"), Str("Mesh")],
            vec![
                node(
                    "Vertices",
                    vec![Doubles(
                        vec![0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 2.0, 2.0, 0.0, 0.0, 2.0, 0.0],
                        compress,
                    )],
                    vec![],
                ),
                node("PolygonVertexIndex", vec![Ints(vec![0, 1, 2, !3])], vec![]),
            ],
        );
        let model = node(
            "Model",
            vec![Long(20), Str("Body\0\x01Model"), Str("Mesh")],
            vec![node(
                "Properties70",
                vec![],
                vec![node(
                    "P",
                    vec![
                        Str("Lcl Translation"),
                        Str("Lcl Translation"),
                        Str(""),
                        Str("A"),
                        Double(1.0),
                        Double(2.0),
                        Double(3.0),
                    ],
                    vec![],
                )],
            )],
        );
        let material = node(
            "Material",
            vec![Long(30), Str("skin_mat\0\x01Material"), Str("")],
            vec![],
        );
        let connection = |child: i64, parent: i64| node("C", vec![Str("OO"), Long(child), Long(parent)], vec![]);

        fbx_file(&[
            node("FBXHeaderExtension", vec![], vec![node("FBXVersion", vec![], vec![])]),
            node("Objects", vec![], vec![geometry, model, material]),
            node(
                "Connections",
                vec![],
                vec![connection(20, 0), connection(10, 20), connection(30, 20)],
            ),
        ])
    }

    #[test]
    fn reads_models_geometry_and_materials() {
        for compress in [false, true] {
            let root = load_fbx(&quad_scene(compress), "body.fbx").unwrap();

            assert_eq!(root.children.len(), 1);
            let body = &root.children[0];
            assert_eq!(body.name, "Body");
            assert!((body.transform.position - Vec3::new(1.0, 2.0, 3.0)).mag() < 1e-6);

            let model = body.model.as_ref().unwrap();
            assert_eq!(model.materials.len(), 1);
            assert_eq!(model.materials[0].name, "skin_mat");
            let mesh = &model.primitives[0].mesh;
            assert_eq!(mesh.vertices.len(), 4);
            assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
            assert_eq!(mesh.vertices[2].position, [2.0, 2.0, 0.0]);
        }
    }

    #[test]
    fn deeply_nested_records_are_rejected() {
        let mut nested = node("Leaf", vec![], vec![]);
        for _ in 0..MAX_RECORD_DEPTH + 10 {
            nested = node("Nested", vec![], vec![nested]);
        }
        let file = fbx_file(&[nested]);

        assert!(matches!(
            load_fbx(&file, "deep.fbx"),
            Err(FbxError::RecordsTooDeep)
        ));
    }

    #[test]
    fn deep_model_chains_are_rejected() {
        use TestProperty::*;

        let count = MAX_MODEL_DEPTH as i64 + 10;
        let models: Vec<TestNode> = (1..=count)
            .map(|id| node("Model", vec![Long(id), Str("Bone\0\x01Model"), Str("Null")], vec![]))
            .collect();
        let mut connections = vec![node("C", vec![Str("OO"), Long(1), Long(0)], vec![])];
        for id in 2..=count {
            connections.push(node("C", vec![Str("OO"), Long(id), Long(id - 1)], vec![]));
        }
        let file = fbx_file(&[
            node("Objects", vec![], models),
            node("Connections", vec![], connections),
        ]);

        assert!(matches!(
            load_fbx(&file, "rig.fbx"),
            Err(FbxError::ModelsTooDeep)
        ));
    }

    #[test]
    fn rejects_other_files() {
        assert!(matches!(
            load_fbx(b"; FBX 7.4.0 project file", "a.fbx"),
            Err(FbxError::Ascii)
        ));
        assert!(matches!(load_fbx(b"glTF", "a.fbx"), Err(FbxError::NotFbx)));

        let mut truncated = quad_scene(false);
        truncated.truncate(60);
        assert!(load_fbx(&truncated, "a.fbx").is_err());
    }
}
