//! Bit-exact Mach-O segment/section model, and a partial-failure-tolerant
//! PE parsing pipeline, sharing one bounds-checked byte cursor and one
//! typed error hierarchy.

pub mod error;
pub mod limits;
pub mod macho;
pub mod pe;
pub mod stream;

pub use error::{BinError, Result};
pub use pe::PeImage;
