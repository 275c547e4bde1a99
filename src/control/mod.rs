use actix_session::{Session, SessionExt};
use actix_web::dev::Payload;
use actix_web::web::{Either, Form, Json};
use actix_web::{get, post, FromRequest, HttpRequest, HttpResponse};
use derive_more::{Display, Error};
use serde::Deserialize;
use std::future::{ready, Ready};

pub mod admin;
pub mod catalog;
pub mod upload;

pub type Response = Result<HttpResponse, ControllerError>;
pub type InputData<T> = Either<Form<T>, Json<T>>;

#[derive(Debug, Display, Error)]
pub enum ControllerError {
    NotFound,
    Unauthorized,
    #[error(ignore)]
    #[display("Invalid field {field}")]
    InvalidInput {
        field: String,
        msg: String,
    },
    #[error(ignore)]
    InternalServerError(anyhow::Error),
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

impl actix_web::error::ResponseError for ControllerError {
    fn error_response(&self) -> HttpResponse {
        log::warn!("{self:?}");
        use ControllerError::*;
        match self {
            NotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": "Not found"
            })),
            Unauthorized => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Unauthorized"
            })),
            InvalidInput { field, msg } => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Invalid input",
                "field": field,
                "message": msg,
            })),
            InternalServerError(err) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": err.to_string()
                }))
            }
        }
    }
}

/// Extractor gating the admin surface: present iff the session carries a
/// login established by [`log_in`].
pub struct AdminUser {
    pub login: String,
}

impl FromRequest for AdminUser {
    type Error = ControllerError;
    type Future = Ready<Result<Self, Self::Error>>;

    #[inline]
    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let session = req.get_session();
        ready(match session.get::<String>("login") {
            Ok(Some(login)) => Ok(AdminUser { login }),
            _ => Err(ControllerError::Unauthorized),
        })
    }
}

#[derive(Deserialize)]
pub struct LoginDto {
    pub login: String,
    pub password: String,
}

#[post("/login")]
async fn log_in(data: InputData<LoginDto>, session: Session) -> Response {
    let form = match data {
        Either::Left(form) => form.into_inner(),
        Either::Right(json) => json.into_inner(),
    };
    if form.login == *crate::ADMIN_USER && form.password == *crate::ADMIN_PASSWORD {
        session
            .insert("login", form.login)
            .map_err(|err| ControllerError::InternalServerError(err.into()))?;
        Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
    } else {
        log::info!("Rejected login attempt for {:?}", form.login);
        Err(ControllerError::Unauthorized)
    }
}

#[get("/logout")]
async fn log_out(session: Session) -> Response {
    session.clear();
    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}
