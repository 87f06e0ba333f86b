//! Narrow client contract for a messaging server endpoint.
//!
//! The core consumes endpoints exclusively through the [`ServerApi`] and
//! [`EventTransport`](transport::EventTransport) traits so that the exact
//! wire protocol stays an external concern and the core is testable with
//! in-memory fakes.

pub mod api;
pub mod http;
#[cfg(test)]
pub mod mock;
pub mod transport;
pub mod ws;
