//! Request handlers for the grid protocol.

mod commit;
mod records;
mod search;

pub use commit::*;
pub use records::*;
pub use search::*;
