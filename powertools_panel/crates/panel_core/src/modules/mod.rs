pub mod backend;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod panel;
pub mod poller;
pub mod protocol;
pub mod reload;
#[cfg(feature = "sim")]
pub mod sim;
pub mod store;
pub mod transport;
pub mod variants;
pub mod ws;
