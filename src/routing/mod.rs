//! Route retrieval and route-based proximity classification.

mod client;
mod measure;
mod resolver;

pub use client::{OsrmClient, RouteError, RouteProvider};
pub use measure::{classify_route, segment_length};
pub use resolver::{ResolveStats, RouteResolver};
