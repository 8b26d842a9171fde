pub mod aggregate;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod guard;
pub mod io;
pub mod machine;
pub mod model;
pub mod report;
pub mod service;
pub mod types;
pub mod validate;
pub mod xml;

pub use error::{CoreError, ErrorKind, Result};
pub use report::Report;
pub use service::Context;
