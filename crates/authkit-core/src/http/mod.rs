//! Request dispatcher: URL construction, bearer-token injection and error normalization.

mod client;
pub mod endpoints;
pub mod error;
mod options;
mod stream;

pub use client::{ApiClient, ApiResult};
pub use endpoints::EndpointRegistry;
pub use error::{ApiError, ErrorDetails, HttpError};
pub use options::RequestOptions;
pub use reqwest::Method;
pub use stream::ByteStream;
