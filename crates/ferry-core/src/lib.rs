pub mod backpressure;
pub mod buffer;
pub mod chunked_stream;
pub mod config;
pub mod driver;
pub mod entry;
pub mod enumeration;
pub mod errors;
pub mod name_resolver;
pub mod task_queue;
pub mod token;

pub use backpressure::BackpressureGovernor;
pub use buffer::{BufferPool, JobId, PoolStats};
pub use chunked_stream::ChunkedBufferStream;
pub use config::TransferLimits;
pub use driver::{DriveSummary, EnumerationDriver, TaskCompletion};
pub use entry::{EntrySource, ItemEntry, TransferEntry};
pub use enumeration::{EntryStream, EnumerateOptions, Location};
pub use errors::{ConfigError, ErrorCategory, ListingError, StuckTransferError};
pub use name_resolver::NameResolver;
pub use task_queue::BoundedTaskQueue;
pub use token::{BackendKind, ContinuationToken, JobCheckpoint};
