//! Cross-cutting context propagated through every operation: cancellation
//! (spec §4.A) and the ambient logging span tasks resume under (spec §4.D).

pub mod cancellation;
pub mod logging;

pub use cancellation::{CancellationContext, CancellationRegistration, CancellationToken};
pub use logging::LoggingContext;
