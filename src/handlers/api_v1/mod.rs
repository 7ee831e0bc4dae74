pub mod proposals;
pub mod votes;
pub mod workflows;

use actix_web::{
    Error, HttpResponse,
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    http::{Method, header},
    middleware::Next,
    web,
};

use crate::errors::AppError;

fn has_body(req: &ServiceRequest) -> bool {
    let headers = req.headers();
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

/// Mutation requests that carry a body must send it as JSON.
///
/// Body-less transitions such as `PUT .../publish` pass through; GET requests
/// are exempt.
async fn require_json_content_type(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let method = req.method().clone();

    if (method == Method::POST || method == Method::PUT || method == Method::DELETE) && has_body(&req) {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !content_type.starts_with("application/json") {
            let body = serde_json::json!({
                "error": "Content-Type must be application/json for mutation requests"
            });
            let response = HttpResponse::BadRequest().json(body);
            return Ok(req.into_response(response).map_into_right_body());
        }
    }

    next.call(req).await.map(|res| res.map_into_left_body())
}

/// Malformed JSON bodies get the same `{ "error": ... }` shape as other 400s.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into())
}

/// Configure API routes under `/api`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config());
    cfg.service(
        web::scope("/proposals")
            .wrap(actix_web::middleware::from_fn(require_json_content_type))
            .route("", web::post().to(proposals::create))
            .route("/{id}", web::get().to(proposals::read))
            .route("/{id}/permissions", web::get().to(proposals::permissions))
            .route("/{id}/events", web::get().to(proposals::list_events))
            .route("/{id}/publish", web::put().to(proposals::publish))
            .route("/{id}/submit-result", web::put().to(proposals::submit_result))
            .route("/{id}/appeal", web::put().to(proposals::appeal))
            .route("/{id}/appeal/submit-result", web::put().to(proposals::submit_appeal_result))
            .route("/{id}/back-to-step", web::put().to(proposals::back_to_step))
            .route("/{id}/archive", web::put().to(proposals::archive))
            .route("/{id}/evaluations/{eid}/reviewers", web::put().to(proposals::set_reviewers))
            .route("/{id}/evaluations/{eid}/reviews", web::get().to(proposals::reviews))
            .route("/{id}/evaluations/{eid}/appeal-reviewers", web::put().to(proposals::set_appeal_reviewers))
            .route("/{id}/evaluations/{eid}/rubric", web::get().to(proposals::rubric))
            .route("/{id}/evaluations/{eid}/rubric-answers", web::put().to(proposals::rubric_answers))
            .route("/{id}/evaluations/{eid}/rubric-criteria", web::put().to(proposals::rubric_criteria))
    );
    cfg.service(
        web::scope("/workflows")
            .wrap(actix_web::middleware::from_fn(require_json_content_type))
            .route("", web::get().to(workflows::list))
            .route("", web::post().to(workflows::upsert))
    );
    cfg.service(
        web::scope("/votes")
            .wrap(actix_web::middleware::from_fn(require_json_content_type))
            .route("/{id}", web::get().to(votes::read))
            .route("/{id}/cast", web::post().to(votes::cast))
    );
}
