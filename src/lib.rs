//! Memory snapshot, scan, and pointer-chain core.
//!
//! Captures point-in-time images of a target's readable memory, narrows
//! candidate addresses with constraint-driven scans across successive
//! snapshots, and discovers chains of pointer dereferences from static
//! module bases to a target address. Process attachment is the caller's
//! concern: everything here works against the [`memory::MemoryAccess`] and
//! [`memory::RegionEnumerator`] traits.
//!
//! Typical flow:
//!
//! ```no_run
//! # fn demo(ctx: &memscan_core::ScanContext) -> anyhow::Result<()> {
//! use memscan_core::{collect_values, scan, Constraint, ElementType, NumericValue, RegionFilter, ScanRequest, Snapshot};
//!
//! let snapshot = Snapshot::query(ctx.regions().as_ref(), RegionFilter::All)?;
//! let snapshot = collect_values(ctx, snapshot, Some("collect"))?.wait().completed().unwrap();
//!
//! let request = ScanRequest::new(ElementType::U32, Constraint::equal(NumericValue::U32(1337)))?;
//! let survivors = scan(ctx, snapshot, request, Some("scan"))?.wait().completed().unwrap();
//! for hit in survivors.elements() {
//!     println!("{:#X} = {:?}", hit.address, hit.current);
//! }
//! # Ok(())
//! # }
//! ```

pub mod collect;
pub mod context;
pub mod error;
pub mod memory;
pub mod pointer;
pub mod scan;
pub mod snapshot;
pub mod task;

pub use collect::collect_values;
pub use context::ScanContext;
pub use error::{ConstraintError, TaskError};
pub use memory::{MemoryAccess, Protection, RegionEnumerator, RegionFilter, RegionInfo};
pub use pointer::{Pointer, PointerBag, PointerScanConfig, PointerSize, pointer_rebase, pointer_retarget, pointer_scan};
pub use scan::{BytePattern, Constraint, ConstraintKind, ElementType, NumericValue, ScanRequest, scan};
pub use snapshot::{ElementRange, ElementView, Snapshot, SnapshotRegion};
pub use task::{TaskOutcome, TaskRegistry, TrackableTask};
