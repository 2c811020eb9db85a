use std::sync::Arc;

use async_trait::async_trait;

use super::request::{Request, ResponseWriter};

/// Terminal request handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: &Request, resp: &mut ResponseWriter);
}

/// Adapter turning a synchronous closure into a [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request, &mut ResponseWriter) + Send + Sync + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(&Request, &mut ResponseWriter) + Send + Sync + 'static,
{
    async fn handle(&self, req: &Request, resp: &mut ResponseWriter) {
        (self.0)(req, resp)
    }
}

/// A step of the request pipeline.
///
/// `next` is consumed when run, so a middleware either short-circuits (drops
/// it) or passes the request on exactly once.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, req: &mut Request, resp: &mut ResponseWriter, next: Next<'_>);
}

/// Continuation of the chain after the current middleware.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub async fn run(self, req: &mut Request, resp: &mut ResponseWriter) {
        match self.rest.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    rest,
                    handler: self.handler,
                };
                current.handle(req, resp, next).await;
            }
            None => self.handler.handle(req, resp).await,
        }
    }
}

/// Ordered list of middleware, built into a [`Chain`].
///
/// Adding returns a new builder, so a partially built list can be shared and
/// extended in different directions.
#[derive(Clone, Default)]
pub struct ChainBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_middleware<I>(&self, middleware: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        let mut next = self.clone();
        next.middleware.extend(middleware);
        next
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Freeze the list around `handler`. Index 0 runs first.
    pub fn build(&self, handler: Arc<dyn Handler>) -> Chain {
        Chain {
            middleware: self.middleware.iter().cloned().collect(),
            handler,
        }
    }
}

impl std::fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.middleware.iter().map(|m| m.name()))
            .finish()
    }
}

/// Immutable middleware chain ending in a handler. Cheap to clone and share.
#[derive(Clone)]
pub struct Chain {
    middleware: Arc<[Arc<dyn Middleware>]>,
    handler: Arc<dyn Handler>,
}

impl Chain {
    pub async fn handle(&self, req: &mut Request, resp: &mut ResponseWriter) {
        if self.middleware.is_empty() {
            return self.handler.handle(req, resp).await;
        }
        Next {
            rest: &self.middleware,
            handler: self.handler.as_ref(),
        }
        .run(req, resp)
        .await
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("middleware", &self.middleware_names())
            .finish()
    }
}

#[async_trait]
impl Handler for Chain {
    async fn handle(&self, req: &Request, resp: &mut ResponseWriter) {
        let mut req = req.clone();
        Chain::handle(self, &mut req, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Middleware for Recording {
        async fn handle(&self, req: &mut Request, resp: &mut ResponseWriter, next: Next<'_>) {
            self.log.lock().push(format!("{}.before", self.name));
            next.run(req, resp).await;
            self.log.lock().push(format!("{}.after", self.name));
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(&self, _req: &mut Request, resp: &mut ResponseWriter, _next: Next<'_>) {
            resp.write_header(StatusCode::FORBIDDEN);
        }
    }

    fn recording(name: &'static str, log: &Log) -> Arc<dyn Middleware> {
        Arc::new(Recording {
            name,
            log: Arc::clone(log),
        })
    }

    fn final_handler(log: &Log) -> Arc<dyn Handler> {
        let log = Arc::clone(log);
        Arc::new(handler_fn(move |_req, resp| {
            log.lock().push("F".to_string());
            resp.write("done");
        }))
    }

    fn request() -> Request {
        Request::new(Method::GET, "/".parse().unwrap())
    }

    #[tokio::test]
    async fn runs_in_registration_order() {
        let log = Log::default();
        let chain = ChainBuilder::new()
            .add_middleware([recording("A", &log), recording("B", &log)])
            .build(final_handler(&log));

        let mut resp = ResponseWriter::new();
        chain.handle(&mut request(), &mut resp).await;

        assert_eq!(
            *log.lock(),
            vec!["A.before", "B.before", "F", "B.after", "A.after"]
        );
        assert_eq!(resp.body(), b"done");
    }

    #[tokio::test]
    async fn empty_chain_calls_handler_directly() {
        let log = Log::default();
        let chain = ChainBuilder::new().build(final_handler(&log));

        let mut resp = ResponseWriter::new();
        chain.handle(&mut request(), &mut resp).await;
        assert_eq!(*log.lock(), vec!["F"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let log = Log::default();
        let chain = ChainBuilder::new()
            .add_middleware([
                recording("A", &log),
                Arc::new(ShortCircuit) as Arc<dyn Middleware>,
                recording("B", &log),
            ])
            .build(final_handler(&log));

        let mut resp = ResponseWriter::new();
        chain.handle(&mut request(), &mut resp).await;

        assert_eq!(*log.lock(), vec!["A.before", "A.after"]);
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn builder_has_value_semantics() {
        let log = Log::default();
        let base = ChainBuilder::new().add_middleware([recording("A", &log)]);
        let left = base.add_middleware([recording("L", &log)]);
        let right = base.add_middleware([recording("R", &log)]);

        assert_eq!(base.len(), 1);
        assert_eq!(left.len(), 2);

        let chain = right.build(final_handler(&log));
        chain.handle(&mut request(), &mut ResponseWriter::new()).await;
        assert_eq!(
            *log.lock(),
            vec!["A.before", "R.before", "F", "R.after", "A.after"]
        );
    }
}
