pub mod error;
pub mod record;

use error::Error;

pub use record::{RawDocument, Record, Snapshot};

pub type SnapflowResult<T> = Result<T, Error>;
