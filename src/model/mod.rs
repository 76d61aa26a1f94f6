//! Core data model: the parsed mail and its derived attributes.

pub mod message;
