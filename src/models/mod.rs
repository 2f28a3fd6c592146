pub mod pass_result;
pub mod source;
pub mod tender;

// Re-exports for convenience
pub use pass_result::*;
pub use source::*;
pub use tender::*;
