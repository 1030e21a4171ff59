mod size;
mod value;

pub use size::{Magnitude, Size, SizeParseError};
pub use value::{ResourceMap, ResourceValue};
