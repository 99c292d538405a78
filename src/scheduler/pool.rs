//! Bounded worker-pool execution of a run graph.
//!
//! A fixed pool of worker tasks consumes a ready queue of node indices. A
//! node enters the queue once its outstanding-deps counter reaches zero;
//! finishing nodes decrement their dependents' counters, failures mark every
//! transitive dependent as an early exit, and cancellation stops workers
//! before they pull the next runnable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, UnitFailure};
use crate::graph::{NodeOutcome, NodeStatus, RunGraph};
use crate::report::{EndOption, Report, Run, RunReason, RunResult};
use crate::runtime::backend::{BackendInvocation, BackendRunner};
use crate::runtime::hooks::ConfigParser;
use crate::runtime::options::RunOptions;
use crate::runtime::telemetry::Telemetry;
use crate::scheduler::output::OutputSink;
use crate::scheduler::policy::{sleep_with_cancellation, PolicyAction, PolicyMatcher};
use crate::scheduler::queue::ReadyQueue;
use crate::unit::{Exclusion, Unit};

const CANCELLED_CAUSE: &str = "cancelled";

/// Everything the scheduler needs for one invocation.
pub struct ExecParams {
    pub graph: RunGraph,
    pub options: Arc<RunOptions>,
    pub parser: Arc<dyn ConfigParser>,
    pub backend: Arc<dyn BackendRunner>,
    pub report: Arc<Report>,
    pub telemetry: Arc<Telemetry>,
    pub cancel: CancellationToken,
    pub output: OutputSink,
}

struct Shared {
    graph: Mutex<RunGraph>,
    queue: ReadyQueue,
    options: Arc<RunOptions>,
    parser: Arc<dyn ConfigParser>,
    backend: Arc<dyn BackendRunner>,
    report: Arc<Report>,
    telemetry: Arc<Telemetry>,
    cancel: CancellationToken,
    output: OutputSink,
    failures: StdMutex<Vec<UnitFailure>>,
    remaining: AtomicUsize,
}

/// Executes the graph until every node is Finished, the run is cancelled, or
/// there is nothing to do. The aggregate error joins every Failure outcome in
/// completion order; early exits and exclusions do not contribute.
pub async fn run(params: ExecParams) -> Result<()> {
    let ExecParams {
        mut graph,
        options,
        parser,
        backend,
        report,
        telemetry,
        cancel,
        output,
    } = params;

    let total = graph.len();
    if total == 0 {
        return Ok(());
    }

    if options.ignore_dependency_order() {
        for idx in 0..total {
            graph.node_mut(idx).outstanding = 0;
        }
    }

    let seeds: Vec<usize> = graph
        .sorted_indices()
        .into_iter()
        .filter(|&idx| graph.node(idx).outstanding == 0)
        .collect();

    let worker_count = options.parallelism().min(total);

    let shared = Arc::new(Shared {
        graph: Mutex::new(graph),
        queue: ReadyQueue::new(),
        options,
        parser,
        backend,
        report,
        telemetry,
        cancel,
        output,
        failures: StdMutex::new(Vec::new()),
        remaining: AtomicUsize::new(total),
    });

    for idx in seeds {
        shared.queue.push(idx).await;
    }

    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let shared = shared.clone();
        workers.push(tokio::spawn(worker_loop(worker_id, shared)));
    }

    for handle in workers {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "scheduler worker panicked");
        }
    }

    if shared.cancel.is_cancelled() {
        sweep_unstarted(&shared).await;
        return Err(Error::Cancelled);
    }

    let failures = std::mem::take(
        &mut *shared.failures.lock().expect("failures lock poisoned"),
    );
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::RunFailures { failures })
    }
}

#[tracing::instrument(name = "scheduler_worker", skip_all, fields(worker = worker_id))]
async fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    loop {
        let idx = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            idx = shared.queue.pop() => match idx {
                Some(idx) => idx,
                None => break,
            },
        };

        let unit = {
            let mut graph = shared.graph.lock().await;
            let node = graph.node_mut(idx);
            node.status = NodeStatus::Running;
            node.unit().clone()
        };

        tracing::debug!(unit = %unit.path.display(), "unit starting");
        let outcome = execute_node(&shared, &unit).await;
        complete(&shared, idx, outcome).await;
    }
}

async fn execute_node(shared: &Shared, unit: &Arc<Unit>) -> NodeOutcome {
    if unit.assume_already_applied {
        tracing::debug!(
            unit = %unit.path.display(),
            "assumed already applied; not running"
        );
        return NodeOutcome::Success;
    }

    if unit.excluded {
        record_excluded_run(shared, unit);
        return NodeOutcome::Success;
    }

    if let Err(err) = Run::new(&unit.path).and_then(|run| shared.report.add_run(run)) {
        shared.telemetry.record_failure();
        return NodeOutcome::Failure(Arc::new(anyhow::Error::new(err)));
    }

    invoke_backend(shared, unit).await
}

async fn invoke_backend(shared: &Shared, unit: &Arc<Unit>) -> NodeOutcome {
    let path = unit.path.as_path();

    // Full parse right before execution, so interpolation happens as late as
    // possible.
    let config = match shared.parser.parse(&unit.config_path) {
        Ok(config) => config,
        Err(err) => return fail_run(shared, unit, err),
    };

    let matcher = match PolicyMatcher::compile(&config.error_policies) {
        Ok(matcher) => matcher,
        Err(err) => return fail_run(shared, unit, err),
    };

    let mut attempt = 1usize;
    let mut retry_block: Option<String> = None;

    loop {
        shared.telemetry.record_backend_run();

        let invocation = BackendInvocation {
            unit,
            command: shared.options.command(),
            args: &unit.options.backend_args,
            cancel: shared.cancel.child_token(),
        };

        let (failure_text, error) = match shared.backend.run(invocation).await {
            Ok(output) => {
                shared.output.flush_unit(&output).await;
                if output.success() {
                    let options = match &retry_block {
                        Some(name) => vec![
                            EndOption::Reason(RunReason::RetrySucceeded),
                            EndOption::RetryBlock(name.clone()),
                        ],
                        None => Vec::new(),
                    };
                    end_run(shared, unit, options);
                    return NodeOutcome::Success;
                }

                let text = output.combined_text();
                let error = anyhow::anyhow!(
                    "backend exited with status {} in {}",
                    output.exit_code,
                    path.display()
                );
                (text, error)
            }
            Err(err) => (format!("{err:#}"), err),
        };

        match matcher.matching(&failure_text) {
            Some(PolicyAction::Retry {
                name,
                max_attempts,
                backoff,
            }) if attempt < max_attempts => {
                shared.telemetry.record_retry();
                tracing::warn!(
                    unit = %path.display(),
                    attempt,
                    max_attempts,
                    block = name,
                    "backend failed with retryable error"
                );
                retry_block = Some(name.to_owned());

                if sleep_with_cancellation(backoff, &shared.cancel).await.is_err() {
                    return cancel_run(shared, unit);
                }

                attempt += 1;
            }
            Some(PolicyAction::Ignore { name }) => {
                tracing::warn!(
                    unit = %path.display(),
                    block = name,
                    error = %error,
                    "backend failure ignored"
                );
                end_run(
                    shared,
                    unit,
                    vec![
                        EndOption::Reason(RunReason::ErrorIgnored),
                        EndOption::IgnoreBlock(name.to_owned()),
                    ],
                );
                return NodeOutcome::Success;
            }
            _ => return fail_run(shared, unit, error),
        }
    }
}

async fn complete(shared: &Shared, idx: usize, outcome: NodeOutcome) {
    let ignore_order = shared.options.ignore_dependency_order();
    let mut newly_ready = Vec::new();
    let mut finished = 1usize;

    {
        let mut graph = shared.graph.lock().await;
        let path = graph.node(idx).unit().path.clone();

        {
            let node = graph.node_mut(idx);
            node.status = NodeStatus::Finished;
            node.outcome = Some(outcome.clone());
        }

        match &outcome {
            NodeOutcome::Failure(error) => {
                shared
                    .failures
                    .lock()
                    .expect("failures lock poisoned")
                    .push(UnitFailure {
                        path: path.clone(),
                        error: error.clone(),
                    });

                if !ignore_order {
                    finished += early_exit_descendants(shared, &mut graph, idx, &path);
                }
            }
            NodeOutcome::Success if !ignore_order => {
                for dep_idx in graph.node(idx).dependents().to_vec() {
                    let node = graph.node_mut(dep_idx);
                    if node.status == NodeStatus::Waiting {
                        node.outstanding = node.outstanding.saturating_sub(1);
                        if node.outstanding == 0 {
                            newly_ready.push(dep_idx);
                        }
                    }
                }
            }
            NodeOutcome::Success | NodeOutcome::EarlyExit { .. } => {}
        }
    }

    for idx in newly_ready {
        shared.queue.push(idx).await;
    }

    if shared.remaining.fetch_sub(finished, Ordering::SeqCst) == finished {
        shared.queue.close().await;
    }
}

/// Marks every still-waiting transitive dependent of `failed_idx` as an early
/// exit caused by it. Returns how many nodes were finished this way.
fn early_exit_descendants(
    shared: &Shared,
    graph: &mut RunGraph,
    failed_idx: usize,
    cause: &std::path::Path,
) -> usize {
    let mut stack = graph.node(failed_idx).dependents().to_vec();
    let mut finished = 0usize;

    while let Some(idx) = stack.pop() {
        if graph.node(idx).status != NodeStatus::Waiting {
            continue;
        }

        stack.extend_from_slice(&graph.node(idx).dependents().to_vec());
        let unit = graph.node(idx).unit().clone();

        let node = graph.node_mut(idx);
        node.status = NodeStatus::Finished;
        finished += 1;

        if unit.excluded {
            // Exclusion was decided before execution; the record keeps saying
            // so even when an ancestor failed.
            node.outcome = Some(NodeOutcome::Success);
            record_excluded_run(shared, &unit);
            continue;
        }

        node.outcome = Some(NodeOutcome::EarlyExit {
            cause: cause.display().to_string(),
        });

        if unit.assume_already_applied {
            continue;
        }

        shared.telemetry.record_early_exit();
        record_run(
            shared,
            &unit,
            vec![
                EndOption::Result(RunResult::EarlyExit),
                EndOption::Reason(RunReason::EarlyExit),
                EndOption::AncestorExit(cause.display().to_string()),
            ],
        );
    }

    finished
}

/// Ends every not-yet-started node as an early exit after cancellation.
/// In-flight nodes have already completed naturally by the time this runs.
async fn sweep_unstarted(shared: &Shared) {
    let mut graph = shared.graph.lock().await;

    for idx in 0..graph.len() {
        if graph.node(idx).status != NodeStatus::Waiting {
            continue;
        }

        let unit = graph.node(idx).unit().clone();
        let node = graph.node_mut(idx);
        node.status = NodeStatus::Finished;
        node.outcome = Some(NodeOutcome::EarlyExit {
            cause: CANCELLED_CAUSE.to_owned(),
        });

        if unit.assume_already_applied {
            continue;
        }

        shared.telemetry.record_early_exit();
        record_run(
            shared,
            &unit,
            vec![
                EndOption::Result(RunResult::EarlyExit),
                EndOption::Reason(RunReason::RunError),
                EndOption::RunError(CANCELLED_CAUSE.to_owned()),
            ],
        );
    }
}

fn record_excluded_run(shared: &Shared, unit: &Unit) {
    shared.telemetry.record_excluded();

    let options = match &unit.exclusion {
        Some(Exclusion::Block { name }) => vec![
            EndOption::Result(RunResult::Excluded),
            EndOption::Reason(RunReason::ExcludeBlock),
            EndOption::ExcludeBlock(name.clone()),
        ],
        _ => vec![
            EndOption::Result(RunResult::Excluded),
            EndOption::Reason(RunReason::ExcludeDir),
        ],
    };

    record_run(shared, unit, options);
}

/// Adds a fresh run for a unit that never invokes the backend and immediately
/// ends it, so start == end.
fn record_run(shared: &Shared, unit: &Unit, options: Vec<EndOption>) {
    let added = Run::new(&unit.path).and_then(|run| shared.report.add_run(run));
    if let Err(err) = added.and_then(|()| shared.report.end_run(&unit.path, options)) {
        tracing::warn!(
            unit = %unit.path.display(),
            error = %err,
            "failed to record run"
        );
    }
}

fn end_run(shared: &Shared, unit: &Unit, options: Vec<EndOption>) {
    if let Err(err) = shared.report.end_run(&unit.path, options) {
        tracing::warn!(
            unit = %unit.path.display(),
            error = %err,
            "failed to end run"
        );
    }
}

fn fail_run(shared: &Shared, unit: &Unit, error: anyhow::Error) -> NodeOutcome {
    shared.telemetry.record_failure();
    end_run(shared, unit, vec![EndOption::Result(RunResult::Failed)]);
    NodeOutcome::Failure(Arc::new(error))
}

fn cancel_run(shared: &Shared, unit: &Unit) -> NodeOutcome {
    shared.telemetry.record_early_exit();
    end_run(
        shared,
        unit,
        vec![
            EndOption::Result(RunResult::EarlyExit),
            EndOption::Reason(RunReason::RunError),
            EndOption::RunError(CANCELLED_CAUSE.to_owned()),
        ],
    );
    NodeOutcome::EarlyExit {
        cause: CANCELLED_CAUSE.to_owned(),
    }
}
