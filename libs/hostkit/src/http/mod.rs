//! Request pipeline: request/response model, middleware chain and the
//! standard middleware every HTTP-facing module runs.

mod chain;
pub mod middleware;
mod request;

pub use chain::{handler_fn, Chain, ChainBuilder, Handler, HandlerFn, Middleware, Next};
pub use middleware::default_middleware;
pub use request::{AttributeValue, Principal, Request, RequestContext, ResponseWriter};

/// Header carrying the caller-supplied (or generated) request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
