//! Domain models for the carelog system.

mod filter;
mod id;
mod record;
mod resident;

pub use filter::*;
pub use id::*;
pub use record::*;
pub use resident::*;
