//! Prelude for ringtrace-engine.
//!
//! This module re-exports the most commonly used types for convenient importing.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ringtrace_engine::prelude::*;
//!
//! let engine = TraceEngine::new();
//! let config = SessionConfig::new(BufferingMode::OneShot, 4096);
//! assert!(engine.start(Arc::new(NopHandler), &config).is_ok());
//! assert_eq!(engine.state(), EngineState::Started);
//! ```

pub use crate::cache::{StringRef, ThreadRef, register_current_thread, register_string};
pub use crate::config::SessionConfig;
pub use crate::context::{ContextHandle, TraceContext};
pub use crate::engine::TraceEngine;
pub use crate::error::{EngineError, EngineResult};
pub use crate::handler::{NopHandler, TraceHandler};
pub use crate::session::{Disposition, EngineState, SessionStats};

pub use ringtrace_buffer::{BufferHeader, BufferingMode, Reservation};
