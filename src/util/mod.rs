//! Small shared utilities: cancellation tokens and progress throttling.

mod cancel;
mod throttle;

pub use cancel::CancelToken;
pub use throttle::Throttle;
