//! Process-wide synchronization primitives: the named-mutex registry that
//! serializes duplicate in-flight work and shares sticky failures between
//! callers (spec §4.C).

pub mod named_mutex;

pub use named_mutex::{peek_error, NamedMutexGuard, NamedMutexRegistry};
