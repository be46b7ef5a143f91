mod material;
mod mesh;
mod model;
mod node;
mod texture;

pub use material::*;
pub use mesh::*;
pub use model::*;
pub use node::*;
pub use texture::*;
