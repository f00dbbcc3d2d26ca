pub mod auth;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod hooks;
pub mod nonce;
pub mod provisioning_client;
pub mod proxy;
pub mod settler;
pub mod sig_down;
pub mod signer;
pub mod stop_handler;
pub mod store;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod voucher;
