pub mod context;
pub mod error;

pub use context::AppContext;
pub use error::{
    FetchError, FreshetError, ParseError, PollError, Result, SinkError, StorageError,
};
