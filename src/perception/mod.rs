pub mod annotator;
pub mod codec;
pub mod screenshot;
pub mod types;
