//! Device abstraction layer
//!
//! Provides the device trait the lighting passes are written against, the
//! resource state tracking they use to emit barriers, and a software device
//! that runs the compute shaders on the CPU.

pub mod software;
pub mod state;
pub mod traits;
pub mod types;

pub use state::*;
pub use traits::*;
pub use types::*;
