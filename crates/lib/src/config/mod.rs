//! Configuration model and loading.

mod load;
mod types;
mod value;

pub use load::{configure_plugins, load, parse_config, validate};
pub use types::*;
pub use value::{ComponentRef, Segment, Value, Variables, list_references, segments};
