//! Match Core - native engine for the memory card game assistant
//!
//! This library provides:
//! - Board memory: which card sits where, and what has been seen
//! - Move selection: commit a known pair or flip the most useful card
//! - Layout cache: learned card regions per screen, validated every cycle
//! - JNI bridge for Android integration

mod config;
mod error;
mod jni_bridge;
mod layout_engine;
mod memory_engine;
mod observation;
mod session;
mod store;
mod strategy_engine;

pub use config::*;
pub use error::*;
pub use layout_engine::*;
pub use memory_engine::*;
pub use observation::*;
pub use session::*;
pub use store::*;
pub use strategy_engine::*;

/// Initialize the native library
pub fn init_library() {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("MatchCore"),
    );
    log::info!("Match Core native library initialized");
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
