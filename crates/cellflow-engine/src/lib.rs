pub(crate) mod builtins;
pub mod engine;
pub mod error;
