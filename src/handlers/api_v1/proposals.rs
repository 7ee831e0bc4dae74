use actix_web::{HttpResponse, web};
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth::identity::CurrentUser;
use crate::auth::permissions::compute_proposal_permissions;
use crate::errors::AppError;
use crate::evaluations::{
    self, AppealEvaluation, GoBackToStep, RubricAnswers, RubricCriteria, SubmitEvaluationResult,
};
use crate::events;
use crate::models::proposal::{self, NewProposal, ProposalDetail};
use crate::models::{evaluation, review, space};

async fn require_view(pool: &PgPool, proposal_id: i64, user: CurrentUser) -> Result<(), AppError> {
    if compute_proposal_permissions(pool, proposal_id, user.id()).await?.view {
        Ok(())
    } else {
        Err(AppError::ActionNotPermitted("You cannot view this proposal".to_string()))
    }
}

async fn load_detail(pool: &PgPool, proposal_id: i64) -> Result<ProposalDetail, AppError> {
    proposal::find_detail(pool, proposal_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("proposal {proposal_id}")))
}

/// POST /api/proposals - Create a draft proposal from a workflow or inline steps
pub async fn create(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    body: web::Json<NewProposal>,
) -> Result<HttpResponse, AppError> {
    if space::membership(pool.get_ref(), body.space_id, user.id()).await?.is_none() {
        return Err(AppError::ActionNotPermitted(
            "Only space members can create proposals".to_string(),
        ));
    }
    let id = proposal::create(&pool, user.id(), &body).await?;
    Ok(HttpResponse::Created().json(load_detail(&pool, id).await?))
}

/// GET /api/proposals/{id} - Proposal with its steps and current step
pub async fn read(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_view(&pool, id, user).await?;
    Ok(HttpResponse::Ok().json(load_detail(&pool, id).await?))
}

/// GET /api/proposals/{id}/permissions - Caller's capability map
pub async fn permissions(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let permissions = compute_proposal_permissions(&pool, path.into_inner(), user.id()).await?;
    Ok(HttpResponse::Ok().json(permissions))
}

/// GET /api/proposals/{id}/events - Published events, oldest first
pub async fn list_events(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_view(&pool, id, user).await?;
    Ok(HttpResponse::Ok().json(events::find_for_proposal(pool.get_ref(), id).await?))
}

/// PUT /api/proposals/{id}/publish
pub async fn publish(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    evaluations::publish_proposal(&pool, id, user.id()).await?;
    Ok(HttpResponse::Ok().json(load_detail(&pool, id).await?))
}

/// PUT /api/proposals/{id}/submit-result - Review the current step
pub async fn submit_result(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<SubmitEvaluationResult>,
) -> Result<HttpResponse, AppError> {
    let outcome =
        evaluations::submit_evaluation_result(&pool, path.into_inner(), user.id(), &body).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// PUT /api/proposals/{id}/appeal - Author appeals a failed step
pub async fn appeal(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<AppealEvaluation>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    evaluations::appeal_evaluation(&pool, id, user.id(), &body).await?;
    Ok(HttpResponse::Ok().json(load_detail(&pool, id).await?))
}

/// PUT /api/proposals/{id}/appeal/submit-result - Review an appealed step
pub async fn submit_appeal_result(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<SubmitEvaluationResult>,
) -> Result<HttpResponse, AppError> {
    let outcome = evaluations::submit_appeal_result(&pool, path.into_inner(), user.id(), &body).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// PUT /api/proposals/{id}/back-to-step - Roll back to a step or to draft
pub async fn back_to_step(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<GoBackToStep>,
) -> Result<HttpResponse, AppError> {
    let plan = evaluations::go_back_to_step(&pool, path.into_inner(), user.id(), body.evaluation_id).await?;
    Ok(HttpResponse::Ok().json(plan))
}

#[derive(Deserialize)]
pub struct ArchiveRequest {
    pub archived: bool,
}

/// PUT /api/proposals/{id}/archive - body `{ "archived": bool }`
pub async fn archive(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<ArchiveRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    evaluations::set_archived(&pool, id, user.id(), body.archived).await?;
    Ok(HttpResponse::Ok().json(load_detail(&pool, id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewersRequest {
    pub reviewer_ids: Vec<i64>,
}

/// PUT /api/proposals/{id}/evaluations/{eid}/reviewers
pub async fn set_reviewers(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<(i64, i64)>,
    body: web::Json<ReviewersRequest>,
) -> Result<HttpResponse, AppError> {
    let (proposal_id, evaluation_id) = path.into_inner();
    evaluations::set_evaluation_reviewers(&pool, proposal_id, evaluation_id, user.id(), &body.reviewer_ids)
        .await?;
    let reviewer_ids = evaluation::find_reviewer_ids(pool.get_ref(), evaluation_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "reviewerIds": reviewer_ids })))
}

/// GET /api/proposals/{id}/evaluations/{eid}/reviews
pub async fn reviews(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse, AppError> {
    let (proposal_id, evaluation_id) = path.into_inner();
    require_view(&pool, proposal_id, user).await?;
    evaluation::find_by_id(pool.get_ref(), evaluation_id)
        .await?
        .filter(|e| e.proposal_id == proposal_id)
        .ok_or_else(|| AppError::NotFound(format!("evaluation {evaluation_id}")))?;
    Ok(HttpResponse::Ok().json(review::find_for_evaluation(pool.get_ref(), evaluation_id).await?))
}

/// PUT /api/proposals/{id}/evaluations/{eid}/appeal-reviewers
pub async fn set_appeal_reviewers(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<(i64, i64)>,
    body: web::Json<ReviewersRequest>,
) -> Result<HttpResponse, AppError> {
    let (proposal_id, evaluation_id) = path.into_inner();
    evaluations::set_appeal_reviewers(&pool, proposal_id, evaluation_id, user.id(), &body.reviewer_ids)
        .await?;
    let reviewer_ids = evaluation::find_appeal_reviewer_ids(pool.get_ref(), evaluation_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "reviewerIds": reviewer_ids })))
}

/// GET /api/proposals/{id}/evaluations/{eid}/rubric - Criteria, answers and averages
pub async fn rubric(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse, AppError> {
    let (proposal_id, evaluation_id) = path.into_inner();
    require_view(&pool, proposal_id, user).await?;
    Ok(HttpResponse::Ok().json(evaluations::load_rubric(&pool, proposal_id, evaluation_id).await?))
}

/// PUT /api/proposals/{id}/evaluations/{eid}/rubric-answers - body `{ "answers": [...] }`
pub async fn rubric_answers(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<(i64, i64)>,
    body: web::Json<RubricAnswers>,
) -> Result<HttpResponse, AppError> {
    let (proposal_id, evaluation_id) = path.into_inner();
    let saved =
        evaluations::save_rubric_answers(&pool, proposal_id, evaluation_id, user.id(), &body.answers).await?;
    Ok(HttpResponse::Ok().json(saved))
}

/// PUT /api/proposals/{id}/evaluations/{eid}/rubric-criteria - body `{ "criteria": [...] }`
pub async fn rubric_criteria(
    pool: web::Data<PgPool>,
    user: CurrentUser,
    path: web::Path<(i64, i64)>,
    body: web::Json<RubricCriteria>,
) -> Result<HttpResponse, AppError> {
    let (proposal_id, evaluation_id) = path.into_inner();
    let stored =
        evaluations::set_rubric_criteria(&pool, proposal_id, evaluation_id, user.id(), &body.criteria).await?;
    Ok(HttpResponse::Ok().json(stored))
}
