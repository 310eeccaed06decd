//! Wire models for the cloud identity service (group enrollment + device API).

pub mod models;
