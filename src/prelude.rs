//! Re-exports the types most outbound callers need.
//!
//! # Example
//! ```rust,no_run
//! use outbound_guard::prelude::*;
//! ```

pub use crate::{
    fallback_value, safe_call, safe_call_with, BreakerRegistry, ClientError, DependencyConfig,
    InvokeOptions, Request, ResilientClient, State, Transport,
};
