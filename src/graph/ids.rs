//! Graph object identifiers.

use std::fmt;

macro_rules! graph_id {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name($raw);

        impl $name {
            /// Wraps a raw id issued by a graph.
            pub fn new(raw: $raw) -> Self {
                Self(raw)
            }

            /// Returns the raw id.
            pub fn raw(self) -> $raw {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

graph_id!(
    /// An element in one graph. Only meaningful to the graph that issued it.
    ElementId,
    u32,
    "element"
);

graph_id!(
    /// A pad on an element.
    PadId,
    u32,
    "pad"
);

graph_id!(
    /// An installed pad probe.
    ProbeId,
    u64,
    "probe"
);
