pub mod applier;
pub mod configuration;
pub mod connection_state;
pub mod crash_log;
pub mod document;
pub mod error;
pub mod fetcher;
pub mod flusher;
pub mod pipeline;
pub mod single_instance;
pub mod status;
pub mod system;
