//! Harnesses that hand out clients for the running service.

pub mod http;
pub mod rpc;
