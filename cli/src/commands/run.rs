//! Shared driver: enqueue, render progress, handle Ctrl-C, summarize.

use objtask_core::api::{CliError, ProgressMonitor, Task, TaskManager, TaskStats, TaskStatus};

/// Exit code when any task did not complete.
pub const EXIT_INCOMPLETE: i32 = 3;

pub fn exit_code_for_stats(stats: &TaskStats) -> i32 {
    if stats.completed == stats.total() {
        0
    } else {
        EXIT_INCOMPLETE
    }
}

pub fn print_plan(tasks: &[Task]) {
    for task in tasks {
        println!(
            "{:<15} {:<32} {}",
            task.display.action_label, task.display.display_name, task.display.sub_info
        );
    }
    println!("{} task(s) planned, nothing executed (dry run)", tasks.len());
}

pub async fn run_tasks(
    manager: &TaskManager,
    tasks: Vec<Task>,
    quiet: bool,
) -> Result<i32, CliError> {
    if tasks.is_empty() {
        if !quiet {
            eprintln!("nothing to do");
        }
        return Ok(0);
    }

    let mut monitor = ProgressMonitor::new(!quiet);
    monitor.attach(manager);
    monitor.set_message(&format!("{} queued", tasks.len()));
    manager.enqueue(tasks);

    tokio::select! {
        _ = manager.wait_idle() => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            let n = manager.cancel_all();
            tracing::warn!("interrupted, canceled {} task(s)", n);
            manager.wait_idle().await;
        }
    }

    let stats = manager.stats();
    monitor.finish(&stats);

    let tasks = manager.get_tasks();
    if quiet {
        println!("{}", summary_json(&stats, &tasks));
    } else {
        for task in tasks.iter().filter(|t| t.status == TaskStatus::Failed) {
            eprintln!(
                "failed: {} ({}): {}",
                task.display.display_name,
                task.display.sub_info,
                task.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    tracing::info!(
        total = stats.total(),
        completed = stats.completed,
        failed = stats.failed,
        canceled = stats.canceled,
        "run finished"
    );
    Ok(exit_code_for_stats(&stats))
}

fn summary_json(stats: &TaskStats, tasks: &[Task]) -> serde_json::Value {
    let items: Vec<_> = tasks
        .iter()
        .map(|t| {
            serde_json::json!({
                "id": t.id,
                "kind": t.kind,
                "target": t.display.sub_info,
                "status": t.status,
                "retry_count": t.retry_count,
                "error": t.error,
            })
        })
        .collect();
    serde_json::json!({ "stats": stats, "tasks": items })
}
