pub mod entries;
pub mod file_tools;
pub mod lifecycle;
pub mod reconciler;
pub mod report_tools;
pub mod retry;

pub use entries::*;
pub use file_tools::*;
pub use lifecycle::*;
pub use reconciler::*;
pub use report_tools::*;
pub use retry::*;
