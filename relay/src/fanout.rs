use fleet::backend_client::{BackendClient, BackendError};
use fleet::registry::Registry;
use fleet::types::Backend;
use std::future::Future;
use tokio::task::JoinSet;

/// Runs `call` against every backend in parallel. Results come back in
/// directory order, one per backend; a failing backend never affects the
/// others. Tasks that panic are dropped from the result.
pub async fn fan_out<T, F, Fut>(
    registry: &Registry,
    client: &BackendClient,
    call: F,
) -> Vec<(Backend, Result<T, BackendError>)>
where
    T: Send + 'static,
    F: Fn(BackendClient, Backend) -> Fut,
    Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
{
    let mut join_set = JoinSet::new();

    for (index, backend) in registry.iter().enumerate() {
        let future = call(client.clone(), backend.clone());
        let backend = backend.clone();
        join_set.spawn(async move { (index, backend, future.await) });
    }

    let mut results = Vec::with_capacity(registry.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!("Fan-out task panicked: {}", e),
        }
    }

    results.sort_by_key(|(index, _, _)| *index);
    results
        .into_iter()
        .map(|(_, backend, result)| (backend, result))
        .collect()
}
