//! Tool implementations
//!
//! One module per operation family. Each exposes `schema()` for tools/list
//! and an `execute` function returning `Result<Value, String>`; the server
//! wraps outcomes into tool-call results.

pub mod delete;
pub mod namespaces;
pub mod recent;
pub mod retrieve;
pub mod skills;
pub mod stats;
pub mod store;
pub mod toggle;
