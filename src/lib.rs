pub mod api;
pub mod config;
pub mod credential;
pub mod error;
pub mod lifecycle;
pub mod provisioner;
pub mod remote;
pub mod token;
pub mod webhook;
