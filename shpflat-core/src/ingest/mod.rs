//! Turns uploaded shapefile archives into projected features, one file at a
//! time, reporting progress as events.

mod error;
mod pipeline;

pub use error::{ClassifiedError, RetryBudget, UploadErrorKind};
pub use pipeline::{FileOutcome, FileSource, Ingestor, MemoryFile};
