// ── Default layers ──
//
// The stack the provider builds, outermost first:
//
//   Store → Bucket → Cache → EndpointMiddleware
//
// Each layer is usable on its own; tests compose them in other orders.

mod bucket;
mod cache;
mod endpoint;
mod store;

pub use bucket::Bucket;
pub use cache::Cache;
pub use endpoint::EndpointMiddleware;
pub use store::Store;
