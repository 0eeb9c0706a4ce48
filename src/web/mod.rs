//! The web module for handling the Axum status/control API.
//! This file declares the other files in this directory as sub-modules.

pub mod api;
pub mod models;
pub mod printer_channel;
