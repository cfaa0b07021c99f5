use noticeboard_core::domain::notice::UserId;
use noticeboard_service::Services;

use crate::commands::{load_config, open_pool, runtime, to_data, CommandResult};

pub fn run(approver_id: &str, limit: Option<u32>) -> CommandResult {
    let config = match load_config("pending") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("pending") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool("pending", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let services = Services::from_pool(&pool, &config);
        let result = services.queries.pending_for(&UserId(approver_id.to_owned()), limit).await;
        pool.close().await;

        match result {
            Ok(records) => CommandResult::success_with_data(
                "pending",
                format!("{} record(s) waiting on `{approver_id}`", records.len()),
                to_data(&records),
            ),
            Err(error) => CommandResult::from_application_error("pending", &error),
        }
    })
}
