//! Zoom pyramid maintenance: parent compositing and upward propagation.

pub mod compose;
pub mod propagate;

pub use compose::{compose_parent, encode_webp, placeholder_tile};
pub use propagate::PyramidService;
