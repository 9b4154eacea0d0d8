//! Sandboxed execution and dispatch engine for untrusted Python snippets:
//! a static security validator, a resource-bounded process runner, and a
//! dispatcher with a blocking path and a queued path with push delivery.

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod notify;
pub mod queue;
pub mod runner;
pub mod validator;
pub mod wire;
pub mod worker;
