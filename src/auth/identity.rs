use actix_web::dev::Payload;
use actix_web::http::header::HeaderMap;
use actix_web::{FromRequest, HttpRequest};
use std::future::{Ready, ready};

use crate::errors::AppError;

/// Header set by the upstream authentication layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller. Session handling lives upstream; this service
/// trusts the user id it is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub i64);

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.0
    }
}

pub fn user_id_from_headers(headers: &HeaderMap) -> Result<i64, AppError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::ActionNotPermitted("Missing caller identity".to_string()))?;
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::ActionNotPermitted("Malformed caller identity".to_string()))
}

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(user_id_from_headers(req.headers()).map(CurrentUser))
    }
}
