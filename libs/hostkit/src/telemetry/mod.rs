//! Distributed tracing capability.
//!
//! A [`Tracer`] extracts a parent [`SpanContext`] from inbound headers, starts
//! server spans and injects context into outbound headers. [`W3cTracer`] uses
//! the OpenTelemetry W3C trace-context propagator and reports spans through
//! `tracing`.

mod tracer;

pub use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId};
pub use tracer::{NoopTracer, TraceError, TraceSpan, Tracer, W3cTracer, TRACEPARENT_HEADER};
