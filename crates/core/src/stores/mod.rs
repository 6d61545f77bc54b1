pub mod vertex;

pub use vertex::{VertexConfig, VertexIndex};
