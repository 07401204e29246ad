//! Height-field environment mapper.
//!
//! Depth samples are projected into a square world grid centred on the
//! origin. Each frame's samples are max-combined per cell in a millimetre
//! scratch buffer, then blended into the persistent map.
//!
//! # Invariants
//! - The scratch buffer holds only the unwritten sentinel between frames.
//! - A cell's height moves toward each new sample by exactly `lerp_height`.
//! - Confidence is zero until a cell is first observed.

mod config;
mod error;
mod mapper;
mod updates;

pub use config::HeightMapConfig;
pub use error::HeightMapError;
pub use mapper::{HeightMapper, HeightSample, TickOutcome};
pub use updates::{CellUpdate, PerFrameUpdates};
