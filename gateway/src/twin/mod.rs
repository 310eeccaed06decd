//! Desired/reported property handling shared by the module and device twins

pub mod reconcile;
