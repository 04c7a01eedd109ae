//! Columnar table values for the Trellis engine.
//!
//! `Frame` is the currency exchanged between adapters, extraction strategies,
//! transforms, validation, and outputs. It is value-semantic: every operation
//! returns a new logical frame and never mutates shared state.

pub mod error;
pub mod frame;
pub mod ops;
pub mod scalar;

pub use error::FrameError;
pub use frame::{Column, Frame};
pub use ops::{AggFunc, JoinHow};
pub use scalar::Scalar;

pub type Result<T> = std::result::Result<T, FrameError>;
