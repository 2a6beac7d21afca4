//! Architecture backends for the platform traits

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
