use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::Error;
use crate::execute::Terminal;
use crate::transport::{OutboundRequest, TransportResponse};

/// A wrapper around the downstream handler. Middleware may inspect or
/// mutate the request, short-circuit with its own response, or transform
/// the response/error on the way back out.
///
/// Client middlewares wrap request middlewares, which wrap the terminal
/// retry engine: with client chain `[c1, c2]` and request chain `[r1, r2]`
/// the execution order is `c1(c2(r1(r2(terminal))))`.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        request: OutboundRequest,
        next: Next<'_>,
    ) -> Result<TransportResponse, Error>;
}

/// The remaining chain. Call [`Next::run`] exactly once to continue;
/// dropping it instead short-circuits the request.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    terminal: &'a Terminal,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stack: &'a [Arc<dyn Middleware>], terminal: &'a Terminal) -> Self {
        Self { stack, terminal }
    }

    pub fn run(mut self, request: OutboundRequest) -> BoxFuture<'a, Result<TransportResponse, Error>> {
        if let Some((current, rest)) = self.stack.split_first() {
            self.stack = rest;
            current.handle(request, self)
        } else {
            Box::pin(self.terminal.run(request))
        }
    }
}
