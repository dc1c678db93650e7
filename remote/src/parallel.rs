use crate::{Error, Executor, Output};
use futures::stream::{self, StreamExt};
use std::{collections::BTreeMap, num::NonZeroUsize, thread, time::Duration};
use tracing::debug;

/// [Executor] that runs a command on many hosts at once.
///
/// Single-host calls are forwarded to the wrapped executor unchanged. Multi-host calls are drained
/// from a shared queue by at most `concurrency` in-flight calls, each tagged with its host, and
/// gathered once every call has completed. The order in which hosts finish is not preserved.
#[derive(Clone, Debug)]
pub struct Parallel<E: Executor> {
    inner: E,
    concurrency: usize,
}

impl<E: Executor> Parallel<E> {
    /// Wrap `inner`, allowing as many in-flight calls as there are available cores.
    pub fn new(inner: E) -> Self {
        let concurrency = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_concurrency(inner, concurrency)
    }

    /// Wrap `inner`, allowing at most `concurrency` in-flight calls (at least one).
    pub fn with_concurrency(inner: E, concurrency: usize) -> Self {
        Self {
            inner,
            concurrency: concurrency.max(1),
        }
    }

    /// Maximum number of in-flight calls.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The wrapped executor.
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Executor> Executor for Parallel<E> {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        superuser: bool,
        timeout: Duration,
    ) -> Result<Output, Error> {
        self.inner.execute(host, command, superuser, timeout).await
    }

    async fn execute_all(
        &self,
        hosts: &[String],
        command: &str,
        superuser: bool,
        timeout: Duration,
    ) -> BTreeMap<String, Result<Output, Error>> {
        debug!(
            hosts = hosts.len(),
            concurrency = self.concurrency,
            %command,
            "executing on all hosts"
        );
        let results: BTreeMap<String, Result<Output, Error>> = stream::iter(hosts.iter().cloned())
            .map(|host| async move {
                let result = self.inner.execute(&host, command, superuser, timeout).await;
                (host, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        debug!(completed = results.len(), "executed on all hosts");
        results
    }
}
