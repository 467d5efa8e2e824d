//! # perimeter-server
//!
//! HTTP host for the perimeter access-control engine.
//!
//! This library provides the API handlers and state management that feed
//! beacon events, rules and location fixes into a running engine and publish
//! its blocking decisions.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod inventory;
pub mod logging;
pub mod state;
