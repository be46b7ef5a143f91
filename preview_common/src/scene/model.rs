use super::{LoadedMaterial, LoadedMesh};

/// Geometry attached to one scene node.
/// Primitives reference the node's material slots by index.
#[derive(Debug, Clone, Default)]
pub struct LoadedModel {
    pub materials: Vec<LoadedMaterial>,
    pub primitives: Vec<LoadedPrimitive>,
}

#[derive(Debug, Clone)]
pub struct LoadedPrimitive {
    pub mesh: LoadedMesh,
    pub material_slot: usize,
}

impl LoadedModel {
    pub fn vertex_count(&self) -> usize {
        self.primitives.iter().map(|p| p.mesh.vertices.len()).sum()
    }

    /// Returns the slot of the material with this name, adding it if needed.
    pub fn material_slot(&mut self, name: &str) -> usize {
        match self.materials.iter().position(|m| m.name == name) {
            Some(slot) => slot,
            None => {
                self.materials.push(LoadedMaterial::standard(name));
                self.materials.len() - 1
            }
        }
    }
}
