use actix_web::{HttpResponse, web};
use serde::Serialize;
use sqlx::PgPool;

use crate::auth::identity::CurrentUser;
use crate::errors::AppError;
use crate::models::space;
use crate::models::vote::{self, UserVote, Vote};
use crate::voting::{self, CastVote};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    #[serde(flatten)]
    pub vote: Vote,
    pub ballots: Vec<UserVote>,
}

/// GET /api/votes/{id} - Vote with its ballots
pub async fn read(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let vote = vote::find_by_id(&pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("vote {id}")))?;
    if space::membership(pool.get_ref(), vote.space_id, user.id()).await?.is_none() {
        return Err(AppError::ActionNotPermitted("You are not a member of this space".to_string()));
    }
    let ballots = vote::find_ballots(pool.get_ref(), id).await?;
    Ok(HttpResponse::Ok().json(VoteResponse { vote, ballots }))
}

/// POST /api/votes/{id}/cast - body `{ "choices": [...] }`
pub async fn cast(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<CastVote>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    voting::cast_vote(&pool, id, user.id(), &body.choices).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "voteId": id, "choices": body.choices })))
}
