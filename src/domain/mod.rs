pub mod node;
pub mod sample;

pub use node::*;
pub use sample::*;
