mod headers;
mod message;
mod request;
mod response;

pub use headers::HeaderValues;
pub use message::{ErrorCode, Message};
pub use request::HttpRequest;
pub use response::HttpResponse;
