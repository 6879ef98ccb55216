//! Agent control protocol: inline `[FACTORY:...]` markers.

pub mod markers;
pub mod stream;

pub use markers::{parse_markers, parse_markers_with_ends, split_trailing_fragment, Marker};
pub use stream::{LocatedMarker, MarkerStream};
