use std::future::Future;

use tokio_util::sync::CancellationToken;

/// A structured error for a single failed/cancelled call within a batch.
/// Never causes the batch itself to fail — it is captured in the
/// corresponding output slot.
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub error: String,
    pub exception_class: String,
}

impl ExecutionError {
    fn tool(error: String) -> Self {
        Self {
            error,
            exception_class: "ToolError".to_string(),
        }
    }

    fn panicked(error: String) -> Self {
        Self {
            error,
            exception_class: "Panic".to_string(),
        }
    }

    fn cancelled() -> Self {
        Self {
            error: "cancelled".to_string(),
            exception_class: "Cancelled".to_string(),
        }
    }
}

/// One call's outcome, reunited with the call it came from.
#[derive(Debug, Clone)]
pub struct CallOutcome<T, R> {
    pub call: T,
    pub result: Result<R, ExecutionError>,
}

/// Fan out `batch` onto independent tasks, fan back in preserving order.
///
/// `output[i].call == batch[i]` for every `i`. A panic or error in one call
/// never prevents the others from completing; it is captured as a structured
/// [`ExecutionError`] in that call's slot. If `cancel` fires while calls are
/// in flight, every still-running task is aborted and surfaces a `Cancelled`
/// outcome.
pub async fn execute_batch<T, R, F, Fut>(
    batch: Vec<T>,
    cancel: &CancellationToken,
    f: F,
) -> Vec<CallOutcome<T, R>>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let mut handles = Vec::with_capacity(batch.len());
    for call in &batch {
        handles.push(tokio::spawn(f(call.clone())));
    }

    let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    let watcher_cancel = cancel.clone();
    let watcher = tokio::spawn(async move {
        watcher_cancel.cancelled().await;
        for h in abort_handles {
            h.abort();
        }
    });

    let mut outcomes = Vec::with_capacity(batch.len());
    for (call, handle) in batch.into_iter().zip(handles.into_iter()) {
        let result = match handle.await {
            Ok(Ok(r)) => Ok(r),
            Ok(Err(e)) => Err(ExecutionError::tool(e.to_string())),
            Err(join_err) if join_err.is_cancelled() => Err(ExecutionError::cancelled()),
            Err(join_err) => Err(ExecutionError::panicked(join_err.to_string())),
        };
        outcomes.push(CallOutcome { call, result });
    }
    watcher.abort();
    outcomes
}
