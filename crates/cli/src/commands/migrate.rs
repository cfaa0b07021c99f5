use crate::commands::{load_config, open_pool, runtime, CommandResult};
use noticeboard_db::migrations;

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool("migrate", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };

        let pending = migrations::pending_versions(&pool).await.unwrap_or_default();
        let result = migrations::run_pending(&pool).await;
        pool.close().await;

        match result {
            Ok(()) if pending.is_empty() => {
                CommandResult::success("migrate", "schema already up to date")
            }
            Ok(()) => CommandResult::success(
                "migrate",
                format!(
                    "applied {} pending migration(s): {}",
                    pending.len(),
                    pending.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
                ),
            ),
            Err(error) => CommandResult::failure("migrate", "migration", error.to_string(), 5),
        }
    })
}
