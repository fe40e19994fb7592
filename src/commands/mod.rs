mod definitions;
mod review;
mod work;

// Re-export command functions for convenience
pub use definitions::definitions;
pub use review::review;
pub use work::work;
