//! Snapshot model: captured memory regions with two value generations.
//!
//! - `bitmap`: per-element validity bits
//! - `region`: one contiguous range plus current/previous buffers
//! - `element`: non-owning element views and iteration
//! - `snapshot`: the sorted, merged region collection

pub mod bitmap;
pub mod element;
pub mod region;
pub mod snapshot;

pub use bitmap::ValidityBitmap;
pub use element::{ElementIter, ElementRange, ElementView};
pub use region::SnapshotRegion;
pub use snapshot::Snapshot;
