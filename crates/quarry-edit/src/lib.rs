pub mod apply;
pub mod engine;
pub mod metric_refs;

pub use apply::*;
pub use engine::*;
pub use metric_refs::*;
