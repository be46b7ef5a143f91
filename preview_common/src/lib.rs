mod renderable;
pub mod scene;
pub mod transform;
mod vertex;

pub use renderable::*;
pub use vertex::*;
