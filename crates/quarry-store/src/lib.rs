pub mod boundary;
pub mod merge;
pub mod sequencer;
pub mod snapshot;
pub mod storage;

pub use boundary::*;
pub use merge::*;
pub use sequencer::*;
pub use snapshot::*;
pub use storage::*;
