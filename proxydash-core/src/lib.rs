//! proxydash core - shared data types
//!
//! This crate holds the types every proxydash consumer agrees on: the request
//! feed (records plus the bounded merger that keeps them) and the traffic
//! snapshot returned by the proxy's management API.
//!
//! HTTP access, profile storage and rendering live in the `proxydash` crate.

mod feed;
mod traffic;

pub use feed::*;
pub use traffic::*;
