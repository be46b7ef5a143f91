use ultraviolet::Vec3;

use crate::transform::Transform;

use super::LoadedModel;

/// One node of a decoded scene graph. Every mesh format is normalized into this tree.
#[derive(Debug, Clone, Default)]
pub struct SceneNode {
    pub name: String,
    pub transform: Transform,
    pub model: Option<LoadedModel>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_model(name: impl Into<String>, model: LoadedModel) -> Self {
        Self {
            name: name.into(),
            model: Some(model),
            ..Default::default()
        }
    }

    /// Depth-first, parents before children.
    pub fn visit_mut(&mut self, visitor: &mut impl FnMut(&mut SceneNode)) {
        visitor(self);
        for child in self.children.iter_mut() {
            child.visit_mut(visitor);
        }
    }

    /// Depth-first with the accumulated world transform of each node.
    pub fn visit_world(&self, visitor: &mut impl FnMut(&SceneNode, &Transform)) {
        self.visit_world_from(&Transform::default(), visitor);
    }

    fn visit_world_from(
        &self,
        parent_transform: &Transform,
        visitor: &mut impl FnMut(&SceneNode, &Transform),
    ) {
        let global_transform = parent_transform * self.transform.clone();
        visitor(self, &global_transform);
        for child in self.children.iter() {
            child.visit_world_from(&global_transform, visitor);
        }
    }

    /// Calls `f` with every vertex position of the tree, in world space.
    pub fn for_each_world_position(&self, mut f: impl FnMut(Vec3)) {
        self.visit_world(&mut |node, transform| {
            if let Some(model) = &node.model {
                for primitive in model.primitives.iter() {
                    for position in primitive.mesh.positions() {
                        f(transform.transform_point(position));
                    }
                }
            }
        });
    }

    pub fn models(&self) -> Vec<&LoadedModel> {
        let mut models = Vec::new();
        self.collect_models(&mut models);
        models
    }

    fn collect_models<'a>(&'a self, models: &mut Vec<&'a LoadedModel>) {
        if let Some(model) = &self.model {
            models.push(model);
        }
        for child in self.children.iter() {
            child.collect_models(models);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.models().iter().map(|m| m.vertex_count()).sum()
    }
}
