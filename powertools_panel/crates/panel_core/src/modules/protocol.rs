pub use powertools_protocol::*;
