use sqlx::PgExecutor;

use crate::errors::AppError;

/// Membership of a user in a space: `None` for non-members, otherwise whether
/// the member is an administrator. Membership is managed by the host app.
pub async fn membership<'e>(
    executor: impl PgExecutor<'e>,
    space_id: i64,
    user_id: i64,
) -> Result<Option<bool>, AppError> {
    let row: Option<(bool,)> = sqlx::query_as(
        "SELECT is_admin FROM space_members WHERE space_id = $1 AND user_id = $2",
    )
    .bind(space_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| r.0))
}
