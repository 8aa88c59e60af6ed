//! Binary RPC control surface
//!
//! One TCP connection per command: the server reads a single request,
//! answers, and closes. See [`messages`] for the wire format and
//! [`server`] for dispatch.

pub mod messages;
mod server;

pub(crate) use server::serve;
