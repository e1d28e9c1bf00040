//! HTTP collaborators for the Quarry model layer
//!
//! - [`HttpClient`]: async transport contract with verb helpers
//! - [`Request`] / [`Response`]: request builder and status/JSON wrapper
//! - [`RouteTable`]: named route resolution with placeholder substitution
//! - [`ErrorBags`]: named, flattened validation messages
//! - [`MockClient`]: scripted transport for tests
//! - `UreqClient` (feature `ureq`): blocking `ureq` transport

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod errors;
pub mod mock;
pub mod route;
#[cfg(feature = "ureq")]
pub mod ureq_client;

pub use client::{query_value, HttpClient, Method, Request, Response, TransportError};
pub use errors::{flatten, validation_parts, Bag, ErrorBags};
pub use mock::MockClient;
pub use route::{Route, RouteError, RouteTable};
#[cfg(feature = "ureq")]
pub use ureq_client::UreqClient;
