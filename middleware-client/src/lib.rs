// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client for the appliance middleware.
//!
//! The policy engine talks to the appliance exclusively through the
//! [`MiddlewareApi`] trait defined here. The production implementation,
//! [`MiddlewareClient`], maps those operations onto middleware method calls
//! carried by one of two interchangeable transports: the local `midclt`
//! command-line client, or JSON-RPC over HTTP. Which one is used is an
//! explicit configuration choice ([`TransportConfig`]), not something
//! inferred at runtime.

pub mod api;
pub mod client;
pub mod exec;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::ApplyError;
pub use api::FetchError;
pub use api::MiddlewareApi;
pub use client::MiddlewareClient;
pub use transport::CallError;
pub use transport::Transport;
pub use transport::TransportBuildError;
pub use transport::TransportConfig;
