//! Convenience re-exports for transport users

pub use crate::channel::{Channel, smbus_selector};
pub use crate::clock::{Clock, SystemClock};
pub use crate::ipmi;
pub use crate::retry::{Backoff, RetryPolicy};
pub use crate::route::{Hop, Link, Route};
pub use crate::transport::Transport;
pub use bmcfw_errors::TransportError;
