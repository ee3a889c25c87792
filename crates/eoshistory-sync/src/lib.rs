pub mod error;
pub mod gaps;
pub mod importer;
pub mod lock;
pub mod queue;
pub mod staging;
pub mod sync;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::*;
pub use gaps::*;
pub use importer::*;
pub use lock::*;
pub use queue::*;
pub use staging::*;
pub use sync::*;
pub use traits::*;
pub use types::*;
