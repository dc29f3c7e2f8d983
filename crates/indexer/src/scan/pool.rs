//! Bounded fan-out/fan-in over blocking work.

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Run `work` over every input on exactly `workers` concurrent workers and
/// collect the `Some` results, in completion order.
///
/// Inputs sit on a bounded queue shared by the workers; each worker runs
/// `work` on a blocking thread, one input at a time. The results queue only
/// closes once every worker has exited, so the returned vector is complete.
///
/// After cancellation, workers finish their in-flight item and take no more.
/// The caller decides what a cancelled, partial result means.
pub async fn parallel_map<I, T, F>(inputs: Vec<I>, workers: usize, cancel: &CancellationToken, work: F) -> Vec<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Option<T> + Send + Sync + 'static,
{
    if inputs.is_empty() {
        return Vec::new();
    }
    let workers = workers.max(1);
    let (queue_tx, queue_rx) = mpsc::channel(inputs.len());
    for input in inputs {
        // Infallible: capacity covers every input and the receiver is alive.
        if queue_tx.send(input).await.is_err() {
            break;
        }
    }
    drop(queue_tx);

    let queue = Arc::new(Mutex::new(queue_rx));
    let work = Arc::new(work);
    let (results_tx, mut results_rx) = mpsc::channel(workers);
    let mut tasks = JoinSet::new();
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let work = Arc::clone(&work);
        let results = results_tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    next = async { queue.lock().await.recv().await } => next,
                };
                let Some(input) = next else {
                    break;
                };
                let work = Arc::clone(&work);
                match tokio::task::spawn_blocking(move || (*work)(input)).await {
                    Ok(Some(output)) => {
                        if results.send(output).await.is_err() {
                            break;
                        }
                    },
                    Ok(None) => {},
                    Err(err) => error!(error = %err, "worker task failed"),
                }
            }
        });
    }
    drop(results_tx);

    let mut outputs = Vec::new();
    while let Some(output) = results_rx.recv().await {
        outputs.push(output);
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "worker exited abnormally");
        }
    }
    outputs
}
