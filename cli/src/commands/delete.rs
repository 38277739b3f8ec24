use objtask_core::api::{CliError, DeleteTaskFactory, Task, TaskManager};

use super::cli::DeleteArgs;
use super::run;

pub async fn handle_delete(
    args: DeleteArgs,
    manager: &TaskManager,
    dry_run: bool,
    quiet: bool,
) -> Result<i32, CliError> {
    let tasks = build_tasks(&args)?;
    if dry_run {
        run::print_plan(&tasks);
        return Ok(0);
    }
    run::run_tasks(manager, tasks, quiet).await
}

/// Plain keys first, then versioned items, each in argument order.
pub fn build_tasks(args: &DeleteArgs) -> Result<Vec<Task>, CliError> {
    if args.keys.is_empty() && args.versions.is_empty() {
        return Err(CliError::Command(
            "nothing to delete: pass keys or --version KEY=VERSION".to_string(),
        ));
    }
    let prefix = args.prefix.as_deref();
    let mut tasks = DeleteTaskFactory::objects(&args.bucket, prefix, &args.keys, args.force);
    tasks.extend(DeleteTaskFactory::versions(
        &args.bucket,
        prefix,
        &args.versions,
        args.force,
    ));
    Ok(tasks)
}
