pub mod range;

pub use range::{range_convert, RangeConfig, RangeConversion, RangeGeometry};
