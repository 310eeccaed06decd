//! Wire models for the video pipeline module's direct-method API.

pub mod models;
