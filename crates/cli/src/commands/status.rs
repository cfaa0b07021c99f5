use noticeboard_core::domain::approval::RecordId;
use noticeboard_service::Services;

use crate::commands::{load_config, open_pool, runtime, to_data, CommandResult};

pub fn run(record_id: &str) -> CommandResult {
    let config = match load_config("status") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("status") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool("status", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let services = Services::from_pool(&pool, &config);
        let result = services.approvals.get_status(&RecordId(record_id.to_owned())).await;
        pool.close().await;

        match result {
            Ok(snapshot) => CommandResult::success_with_data(
                "status",
                format!(
                    "record {} is {} ({} of {} steps approved)",
                    snapshot.record_id,
                    snapshot.overall_status.as_str(),
                    snapshot.approved_steps,
                    snapshot.total_steps
                ),
                to_data(&snapshot),
            ),
            Err(error) => CommandResult::from_application_error("status", &error),
        }
    })
}
