pub mod assets;
pub mod context;
pub mod messages;
pub mod output;
pub mod streaming;

pub use assets::*;
pub use context::*;
pub use messages::*;
pub use output::*;
pub use streaming::*;
