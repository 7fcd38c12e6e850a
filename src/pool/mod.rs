//! Fixed-capacity allocation pools for hot-path control blocks.

pub mod slab;

pub use slab::{Pooled, SlabPool};
