use noticeboard_core::domain::approval::RecordId;
use noticeboard_core::domain::notice::UserId;
use noticeboard_service::{Services, WithdrawInput};

use crate::commands::{load_config, open_pool, runtime, to_data, CommandResult};

/// `admin` marks an operator withdrawal and skips the author check.
pub fn run(record_id: &str, actor_id: &str, reason: &str, admin: bool) -> CommandResult {
    let config = match load_config("withdraw") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("withdraw") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_pool("withdraw", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let services = Services::from_pool(&pool, &config);
        let input = WithdrawInput {
            actor_id: UserId(actor_id.to_owned()),
            reason: reason.to_owned(),
            admin_override: admin,
        };
        let result = services
            .approvals
            .withdraw(&RecordId(record_id.to_owned()), input, "cli-withdraw")
            .await;
        pool.close().await;

        match result {
            Ok(snapshot) => CommandResult::success_with_data(
                "withdraw",
                format!("record {} withdrawn", snapshot.record_id),
                to_data(&snapshot),
            ),
            Err(error) => CommandResult::from_application_error("withdraw", &error),
        }
    })
}
