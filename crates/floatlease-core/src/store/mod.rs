// # Server Location Store Implementations
//
// This module provides implementations of the ServerLocationStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileLocationStore;
pub use memory::MemoryLocationStore;
