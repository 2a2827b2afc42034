pub mod http_client;
pub mod traits;

pub use http_client::{HttpSource, HttpSourceBuilder};
pub use traits::Source;
