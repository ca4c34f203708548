//! Map replication: a string-keyed value map, one publisher, many replicas,
//! with typed validated projections on the subscriber side.

pub mod projection;
pub mod sink;
pub mod source;

pub use projection::Projection;
pub use sink::MapSink;
pub use source::MapSource;
