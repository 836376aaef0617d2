//! Hashing primitives

pub mod hash;

pub use hash::Hash256;
