//! Filesystem utilities for margarita.

pub mod atomic;

pub use atomic::{atomic_write, atomic_write_file};
