//! Utilities shared by the primary and secondary processors

pub mod spinlock;

pub use spinlock::Spinlock;
