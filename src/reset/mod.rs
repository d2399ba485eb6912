//! One-time password-reset codes and their background maintenance.

pub mod codes;
pub mod sweeper;
