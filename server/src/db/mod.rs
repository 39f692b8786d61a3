//! In-memory storage for the served records.

mod seed;
mod table;

pub use seed::load_seed;
pub use table::{Table, MAX_RETAINED_SEARCHES};
