//! Containerised services.
//!
//! Each service is in its own submodule with:
//! - `cmd.rs` - Command builder for the container arguments
//! - `mod.rs` - Config, Handler, and start logic

pub mod anvil;

pub use anvil::{AnvilConfig, AnvilHandler};
