//! Request/response transport for BMC firmware updates
//!
//! The engine never touches a bus directly. It builds IPMI-style requests
//! (`[netfn << 2, cmd, data...]`) and hands them to a [`Transport`] together
//! with a [`Route`] describing the slot, the physical link and any bridge
//! hops in between. A [`Channel`] binds a transport to one route and layers
//! the shared retry policy and the common request shapes on top.
//!
//! # Architecture
//!
//! - [`transport`]: The [`Transport`] contract implemented by the platform
//! - [`route`]: [`Route`]/[`Hop`] and bridge encapsulation
//! - [`retry`]: [`RetryPolicy`] and [`Backoff`]
//! - [`clock`]: [`Clock`] abstraction over sleeps and monotonic time
//! - [`channel`]: [`Channel`], the per-session request helper
//! - [`ipmi`]: Network function, command and IANA constants
//!
//! # Example
//!
//! ```
//! use bmcfw_transport::prelude::*;
//!
//! let route = Route::slot(1).via(Hop::new(ipmi::intf::EXP_BIC));
//! assert_eq!(route.hops().len(), 1);
//!
//! let wrapped = route.encapsulate(&[ipmi::NETFN_APP << 2, 0x01]);
//! assert_eq!(&wrapped[2..5], &ipmi::IANA_ID);
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod channel;
pub mod clock;
pub mod ipmi;
pub mod prelude;
pub mod retry;
pub mod route;
pub mod transport;

pub use bmcfw_errors::TransportError;
pub use channel::{Channel, smbus_selector};
pub use clock::{Clock, SystemClock};
pub use retry::{Backoff, RetryPolicy};
pub use route::{Hop, Link, Route};
pub use transport::Transport;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
