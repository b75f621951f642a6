//! Infrastructure adapters for the Library & Collections context.

pub mod in_memory;
