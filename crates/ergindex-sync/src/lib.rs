//! ergindex-sync — the indexing pipeline.
//!
//! ```text
//! SyncController
//!     ├── ReorgDetector   (lineage walkback against the store)
//!     ├── WorkPool        (bounded parallel fetch+parse, ordered emission)
//!     └── Projector       (sole writer: one store transaction per block,
//!                          balance deltas + token metadata inside it)
//! ```
//!
//! Exactly one controller runs per store. All parallelism lives in the
//! WorkPool; the Projector serializes commits, which is what makes height
//! ordering and the balance invariants hold trivially.

pub mod controller;
pub mod projector;
pub mod reorg;
pub mod workpool;

pub use controller::{ControllerState, SyncController};
pub use projector::Projector;
pub use reorg::{ReorgDetector, ReorgOutcome};
pub use workpool::WorkPool;
