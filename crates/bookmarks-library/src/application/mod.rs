//! Application layer for the Library & Collections context.

pub mod command_handlers;
