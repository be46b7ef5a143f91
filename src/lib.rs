pub mod archive;
pub mod camera;
pub mod classifier;
pub mod config_loader;
pub mod decode;
pub mod download;
pub mod material_binder;
pub mod preview;
pub mod texture_pool;

pub use preview_common;
