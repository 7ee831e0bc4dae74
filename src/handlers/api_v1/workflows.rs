use actix_web::{HttpResponse, web};
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth::identity::CurrentUser;
use crate::auth::permissions::require_space_admin;
use crate::errors::AppError;
use crate::models::{space, workflow};
use crate::models::workflow::WorkflowUpsert;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceQuery {
    pub space_id: i64,
}

/// GET /api/workflows?spaceId= - Workflows of a space in display order
pub async fn list(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    query: web::Query<SpaceQuery>,
) -> Result<HttpResponse, AppError> {
    if space::membership(pool.get_ref(), query.space_id, user.id()).await?.is_none() {
        return Err(AppError::ActionNotPermitted("You are not a member of this space".to_string()));
    }
    let workflows = workflow::find_for_space(pool.get_ref(), query.space_id).await?;
    Ok(HttpResponse::Ok().json(workflows))
}

/// POST /api/workflows - Create or replace a workflow; existing templates follow
pub async fn upsert(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    body: web::Json<WorkflowUpsert>,
) -> Result<HttpResponse, AppError> {
    require_space_admin(&pool, body.space_id, user.id()).await?;
    let outcome = workflow::upsert(&pool, &body).await?;
    Ok(HttpResponse::Ok().json(outcome))
}
