//! Wire types and routing primitives shared by the `chain` crates: no
//! networking, no async runtime dependency beyond the traits in
//! [`contracts`] that concrete adapters implement.

pub mod contracts;
pub mod context;
pub mod error;
pub mod message;
pub mod path;
pub mod wildcard;

pub use context::Context;
pub use error::{ChainError, ChainResult};
pub use message::{Message, Status};
pub use path::{PathInfo, Segment, SegmentKind};
pub use wildcard::WildcardStore;
