//! Core library for client-side session and token lifecycle management shared by the CLI and
//! any embedding application.

pub mod auth;
pub mod client;
pub mod config;
pub mod http;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::AuthKit;
