//! llama-bridge: host-facing session layer over a llama.cpp-style engine.
//!
//! The bridge owns none of the inference mathematics. It translates host
//! requests into engine calls in a fixed sequence and translates engine
//! results and failures back:
//!   create(path, options) → handle → completion(prompt, sampling) → release
//!
//! - [`engine`]: the engine contract, refcounted backend, and a stub engine
//! - [`session`]: handle registry, completion loop, single-session manager
//! - [`config`]: runtime and sampling options, lenient JSON loading
//! - [`budget`]: token budget estimation for hosts
//! - [`error`]: the boundary error type

pub mod budget;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;

pub use config::{RuntimeOptions, SamplingOptions};
pub use error::BridgeError;
pub use session::completion::{ListenerError, TokenListener};
pub use session::manager::SessionManager;
pub use session::registry::{SessionHandle, SessionRegistry};
