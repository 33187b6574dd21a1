//! The CRDT primitives: clocks, containers, canonical key encodings, and
//! property values.

pub mod clock;
pub mod keycodec;
pub mod lww;
pub mod orset;
pub mod value;

pub use clock::{Dot, EventId, VersionVector};
pub use lww::LWWRegister;
pub use orset::ORSet;
pub use value::PropertyValue;
