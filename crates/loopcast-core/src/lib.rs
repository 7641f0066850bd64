//! `loopcast-core`: ids, configuration and the top-level error type shared
//! by the scheduler library and the daemon.

pub mod config;
pub mod error;
pub mod types;

pub use error::{LoopcastError, Result};
pub use types::{InfluencerId, LoopId, TeamId};
