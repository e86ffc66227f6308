//! Pipeline stages and the registry that names them.
//!
//! A stage is either a batch stage (no prerequisite, creates projects) or a
//! per-project stage (runs on every project whose status equals its
//! prerequisite). Stage logic lives outside this crate; it is plugged in
//! through [`StageRegistry::builder`].
//!
//! # Example
//!
//! ```ignore
//! use drp_core::stage::{NoopStage, StageRegistry, NOOP_STAGE};
//!
//! let registry = StageRegistry::builder()
//!     .batch(NOOP_STAGE, NoopStage)
//!     .batch("sourcing", SourcingStage::new(sheet))
//!     .per_project("collector", "sourcing", CollectorStage::new(client))
//!     .build()?;
//!
//! let collector = registry.resolve("collector")?;
//! assert_eq!(collector.prerequisite(), Some("sourcing"));
//! ```

mod error;
mod noop;
mod registry;
mod traits;
mod types;

pub use error::{RegistryError, StageError};
pub use noop::{NoopStage, NOOP_STAGE};
pub use registry::{StageDefinition, StageHandler, StageRegistry, StageRegistryBuilder};
pub use traits::{BatchStage, ProjectStage};
pub use types::{BatchContext, BatchOutcome, StageContext, StageKind, StageResult};
