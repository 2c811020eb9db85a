use std::time::{Duration, Instant};

use http::HeaderMap;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanContext, TraceContextExt, TraceFlags, TraceState};
use opentelemetry::Context;
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use thiserror::Error;

/// Header carrying the W3C trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("malformed traceparent header '{0}'")]
    Malformed(String),
}

/// Tracing backend used by the request pipeline and by modules.
pub trait Tracer: Send + Sync {
    fn name(&self) -> &str;

    /// Read the caller's span context from inbound headers.
    ///
    /// `Ok(None)` means no context was sent; `Err` means it was sent but malformed.
    fn extract(&self, headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError>;

    /// Write `ctx` into outbound headers.
    fn inject(&self, ctx: &SpanContext, headers: &mut HeaderMap);

    /// Start a span, as a child of `parent` when given.
    fn start_span(&self, operation: &str, parent: Option<&SpanContext>) -> TraceSpan;
}

/// A started span. Finishing consumes it; dropping an unfinished span finishes it.
pub struct TraceSpan {
    operation: String,
    context: Option<SpanContext>,
    parent: Option<SpanContext>,
    span: tracing::Span,
    started: Instant,
    finished: bool,
}

impl TraceSpan {
    fn new(operation: &str, context: SpanContext, parent: Option<SpanContext>) -> Self {
        let span = tracing::info_span!(
            "server_span",
            operation = %operation,
            trace_id = %context.trace_id(),
            span_id = %context.span_id(),
            parent_id = tracing::field::Empty,
        );
        if let Some(parent) = &parent {
            span.record("parent_id", tracing::field::display(parent.span_id()));
        }
        Self {
            operation: operation.to_string(),
            context: Some(context),
            parent,
            span,
            started: Instant::now(),
            finished: false,
        }
    }

    fn disabled(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            context: None,
            parent: None,
            span: tracing::Span::none(),
            started: Instant::now(),
            finished: true,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Context to propagate downstream; `None` for spans of a no-op tracer.
    pub fn context(&self) -> Option<&SpanContext> {
        self.context.as_ref()
    }

    pub fn parent(&self) -> Option<&SpanContext> {
        self.parent.as_ref()
    }

    /// The `tracing` span backing this trace span, for `Instrument`.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(mut self) {
        self.end();
    }

    fn end(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let _entered = self.span.enter();
        tracing::debug!(
            operation = %self.operation,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "span finished"
        );
    }
}

impl Drop for TraceSpan {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for TraceSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSpan")
            .field("operation", &self.operation)
            .field("context", &self.context)
            .field("parent", &self.parent)
            .finish()
    }
}

/// W3C trace-context tracer backed by the OpenTelemetry propagator.
/// Spans are reported through `tracing`.
#[derive(Debug, Default, Clone)]
pub struct W3cTracer {
    propagator: TraceContextPropagator,
    ids: RandomIdGenerator,
}

impl W3cTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for W3cTracer {
    fn name(&self) -> &str {
        "w3c"
    }

    fn extract(&self, headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError> {
        let Some(raw) = headers.get(TRACEPARENT_HEADER) else {
            return Ok(None);
        };
        let cx = self
            .propagator
            .extract_with_context(&Context::new(), &HeaderExtractor(headers));
        let remote = cx.span().span_context().clone();
        if !remote.is_valid() {
            return Err(TraceError::Malformed(
                String::from_utf8_lossy(raw.as_bytes()).into_owned(),
            ));
        }
        Ok(Some(remote))
    }

    fn inject(&self, ctx: &SpanContext, headers: &mut HeaderMap) {
        let cx = Context::new().with_remote_span_context(ctx.clone());
        self.propagator.inject_context(&cx, &mut HeaderInjector(headers));
    }

    fn start_span(&self, operation: &str, parent: Option<&SpanContext>) -> TraceSpan {
        let context = match parent {
            Some(parent) => SpanContext::new(
                parent.trace_id(),
                self.ids.new_span_id(),
                parent.trace_flags(),
                false,
                parent.trace_state().clone(),
            ),
            None => SpanContext::new(
                self.ids.new_trace_id(),
                self.ids.new_span_id(),
                TraceFlags::SAMPLED,
                false,
                TraceState::default(),
            ),
        };
        TraceSpan::new(operation, context, parent.cloned())
    }
}

/// Tracer that records nothing and propagates nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn name(&self) -> &str {
        "noop"
    }

    fn extract(&self, _headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError> {
        Ok(None)
    }

    fn inject(&self, _ctx: &SpanContext, _headers: &mut HeaderMap) {}

    fn start_span(&self, operation: &str, _parent: Option<&SpanContext>) -> TraceSpan {
        TraceSpan::disabled(operation)
    }
}
