//! Shared integration-test harness: an in-process server plus a websocket
//! test peer.

#![allow(dead_code)]

pub mod client;
pub mod server;

pub use client::TestPeer;
pub use server::TestServer;
