//! Base types and error handling.
//!
//! Provides foundational types shared by the pool and its transports:
//! - [`NetError`](neterror::NetError): Network error codes in the style of `net_error_list.h`
//! - [`TimeLine`](timeline::TimeLine): Monotonic clocks and keep-alive deadlines

pub mod context;
pub mod neterror;
pub mod timeline;
