//! Scripted [Executor] for tests.

use crate::{Error, Executor, Output};
use futures::future::BoxFuture;
use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

/// A command observed by [Mock].
#[derive(Clone, Debug)]
pub struct Call {
    pub host: String,
    pub command: String,
    pub superuser: bool,
    pub timeout: Duration,
}

type Handler = Arc<dyn Fn(&Call) -> BoxFuture<'static, Result<Output, Error>> + Send + Sync>;

/// [Executor] that answers every call with a caller-provided handler and records what it saw.
#[derive(Clone)]
pub struct Mock {
    handler: Handler,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Mock {
    /// Answer each call synchronously.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Call) -> Result<Output, Error> + Send + Sync + 'static,
    {
        Self::new_async(move |call| {
            let result = handler(call);
            async move { result }
        })
    }

    /// Answer each call with a future (to simulate slow hosts).
    pub fn new_async<F, Fut>(handler: F) -> Self
    where
        F: Fn(&Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Output, Error>> + Send + 'static,
    {
        Self {
            handler: Arc::new(
                move |call: &Call| -> BoxFuture<'static, Result<Output, Error>> {
                    Box::pin(handler(call))
                },
            ),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// All calls observed so far, in the order they were made.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands observed on `host`, in order.
    pub fn commands(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.host == host)
            .map(|c| c.command.clone())
            .collect()
    }
}

impl Executor for Mock {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        superuser: bool,
        timeout: Duration,
    ) -> Result<Output, Error> {
        let call = Call {
            host: host.to_string(),
            command: command.to_string(),
            superuser,
            timeout,
        };
        let response = (self.handler)(&call);
        self.calls.lock().unwrap().push(call);
        response.await
    }
}
