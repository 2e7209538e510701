// Library exports for metasocial
// This allows integration tests and the binary to share the client modules

pub mod auth;
pub mod backend;
pub mod commands;
pub mod config;
pub mod data;
pub mod editor;
pub mod error;
pub mod media;
pub mod models;
pub mod state;
pub mod timeline;
