//! Integration tests for labmux
//!
//! Both daemons run against real loopback sockets and the in-process bus.

mod collector;
mod common;
mod relay;
