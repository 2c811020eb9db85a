use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::telemetry::SpanContext;

/// A value that can be stored as a request-context attribute.
///
/// Implemented for everything that is `Serialize`.
pub trait AttributeValue {
    fn to_json(&self) -> Result<Value, serde_json::Error>;
}

impl<T: Serialize + ?Sized> AttributeValue for T {
    fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Request-scoped context threaded through the middleware chain.
///
/// Cloning is cheap. Every `with_*` method returns a new context and leaves
/// the receiver untouched.
#[derive(Clone)]
pub struct RequestContext {
    attributes: Arc<HashMap<String, Value>>,
    principal: Option<Arc<Principal>>,
    request_id: Option<Arc<str>>,
    logger: tracing::Span,
    span_context: Option<SpanContext>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            attributes: Arc::default(),
            principal: None,
            request_id: None,
            logger: tracing::Span::none(),
            span_context: None,
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("principal", &self.principal)
            .field("attributes", &self.attributes)
            .field("span_context", &self.span_context)
            .finish()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a context carrying `key = value`. Never panics: a value that
    /// fails to serialize is stored as `null`.
    pub fn with_attribute(&self, key: &str, value: &dyn AttributeValue) -> Self {
        let value = value.to_json().unwrap_or_else(|err| {
            tracing::debug!(key, error = %err, "attribute value is not serializable; storing null");
            Value::Null
        });
        let mut attributes = (*self.attributes).clone();
        attributes.insert(key.to_string(), value);
        Self {
            attributes: Arc::new(attributes),
            ..self.clone()
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn with_principal(&self, principal: Principal) -> Self {
        Self {
            principal: Some(Arc::new(principal)),
            ..self.clone()
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_deref()
    }

    pub fn with_request_id(&self, id: impl Into<Arc<str>>) -> Self {
        Self {
            request_id: Some(id.into()),
            ..self.clone()
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Bind the request-scoped logger span.
    pub fn with_logger(&self, span: tracing::Span) -> Self {
        Self {
            logger: span,
            ..self.clone()
        }
    }

    pub fn logger(&self) -> &tracing::Span {
        &self.logger
    }

    pub fn with_span_context(&self, ctx: SpanContext) -> Self {
        Self {
            span_context: Some(ctx),
            ..self.clone()
        }
    }

    /// The active trace span context, if a tracer attached one.
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span_context.as_ref()
    }
}

/// Inbound request as seen by middleware and handlers.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    context: RequestContext,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            context: RequestContext::new(),
        }
    }

    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            context: RequestContext::new(),
        }
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn set_context(&mut self, context: RequestContext) {
        self.context = context;
    }
}

/// Response under construction.
///
/// The status is fixed by the first `write_header` (or the first `write`,
/// which implies 200); later calls do not change it.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_header(&mut self, status: StatusCode) {
        match self.status {
            None => self.status = Some(status),
            Some(current) if current != status => {
                tracing::debug!(%current, ignored = %status, "superfluous write_header call");
            }
            Some(_) => {}
        }
    }

    pub fn write(&mut self, data: impl AsRef<[u8]>) {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(data.as_ref());
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn is_written(&self) -> bool {
        self.status.is_some()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Discard everything written so far.
    pub fn reset(&mut self) {
        self.status = None;
        self.headers.clear();
        self.body.clear();
    }

    pub fn into_response(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(self.body.freeze());
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}
