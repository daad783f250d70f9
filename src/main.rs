use std::sync::Arc;
use std::time::Duration;

use task_sequencer::config::{self, WorkerConfig};
use task_sequencer::worker::{Runnable, Task, Worker, WorkerEvent};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> task_sequencer::error::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from_env()?;
    let raw_plan = std::env::var(config::ENV_TASKS)
        .unwrap_or_else(|_| config::DEFAULT_TASK_PLAN.to_string());
    let plan = config::parse_task_plan(&raw_plan)?;

    eprintln!("Task Sequencer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Worker: {}", config.name);
    eprintln!("   Tasks: {}", plan.len());
    match config.deadline {
        Some(deadline) => eprintln!("   Deadline: {} ms\n", deadline.as_millis()),
        None => eprintln!("   Deadline: none\n"),
    }

    let worker = Worker::with_config(&config);
    let tasks: Vec<Arc<dyn Runnable>> = plan
        .into_iter()
        .map(|entry| {
            let description = format!("Sleeping for {} ms", entry.duration.as_millis());
            let task = Task::new_async(
                entry.name,
                entry.weight,
                description,
                |duration: Arc<Duration>| async move {
                    tokio::time::sleep(*duration).await;
                    Ok(())
                },
                entry.duration,
            );
            Arc::new(task) as Arc<dyn Runnable>
        })
        .collect();
    worker.add_tasks(tasks).await?;

    let reporter = tokio::spawn(report_events(worker.subscribe()));

    worker.run(config.deadline).await?;
    let outcome = if worker.is_running() {
        worker.wait().await
    } else {
        worker.last_error().await.map_or(Ok(()), Err)
    };
    if worker.is_ready() {
        // Empty plan: no run started, so no terminal event will arrive.
        reporter.abort();
    } else if let Err(e) = reporter.await {
        tracing::warn!("Event reporter task failed: {e}");
    }

    eprintln!();
    eprintln!("   State: {}", worker.state());
    eprintln!("   Progress: {:.1}%", worker.progress().await);
    eprintln!(
        "   Remaining workload: {:.1} of {:.1}",
        worker.remaining_work_load().await,
        worker.total_work_load().await
    );
    if let Ok(duration) = worker.duration().await {
        eprintln!("   Duration: {duration:.3} s");
    }

    if let Err(e) = outcome {
        tracing::error!(error = %e, "Run did not complete");
        std::process::exit(1);
    }

    Ok(())
}

/// Log worker events until the run reaches a terminal state.
async fn report_events(mut events: broadcast::Receiver<WorkerEvent>) {
    loop {
        match events.recv().await {
            Ok(WorkerEvent::StateChanged { to, .. }) if to.is_terminal() => {
                tracing::info!(state = %to, "Run ended");
                break;
            }
            Ok(WorkerEvent::TaskStarted { index, name, .. }) => {
                tracing::info!(index, task = %name, "Task started");
            }
            Ok(WorkerEvent::TaskFinished {
                index,
                name,
                progress,
                ..
            }) => {
                tracing::info!(index, task = %name, "Task finished ({progress:.1}%)");
            }
            Ok(WorkerEvent::TaskFailed {
                index,
                name,
                reason,
                ..
            }) => {
                tracing::warn!(index, task = %name, %reason, "Task failed");
            }
            Ok(event) => tracing::debug!(?event, "Worker event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event reporter fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
