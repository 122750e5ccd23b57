// Common utilities shared by the handlers

pub mod relay;
pub mod schemas;
