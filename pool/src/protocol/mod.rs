//! Protocol detection: the non-destructive peek wrapper, the byte-pattern
//! classifier, and the router that dispatches a classified connection to
//! its handler (or closes it).

pub mod detector;
pub mod peek;
pub mod router;

pub use detector::{detect, ProtocolVersion};
pub use peek::PeekableConnection;
pub use router::{RouteError, Router, RouterSnapshot};
