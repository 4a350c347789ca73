//! # Sessions
//!
//! `Authorization: Bearer <token>` on every route except `/health`, signup and login.
//!
//! Tokens are random hex handed out by the ledger on signup/login. They live until
//! `SESSION_TTL_HOURS` passes or the user logs out; the sweep task prunes the dead ones.
use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, State, rejection::JsonRejection},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::IntoResponse,
};
use bank::{
    LedgerError,
    models::{PublicUser, Role, User},
    utils::constant_time_eq,
};
use chrono::Utc;
use tracing::info;

use crate::{
    error::AppError,
    state::AppState,
    utils::{LoginRequest, SessionResponse, SignupRequest, payload},
};

pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn require(&self, role: Role) -> Result<(), AppError> {
        if self.user.role == role {
            return Ok(());
        }

        Err(LedgerError::Forbidden(format!("{role} only")).into())
    }

    pub fn require_any(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.user.role) {
            return Ok(());
        }

        Err(LedgerError::Forbidden(format!("not available to {}", self.user.role)).into())
    }
}

fn bearer(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?
        .trim();

    (!token.is_empty()).then(|| token.to_string())
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, AppError> {
        let token = bearer(parts).ok_or(AppError::Unauthorized)?;
        let now = Utc::now();

        let user = state
            .store
            .read(|ledger| ledger.session_user(&token, now).cloned())
            .await
            .map_err(|_| AppError::Unauthorized)?;

        Ok(AuthUser { user, token })
    }
}

pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload(body)?;

    if request.role == Role::Admin {
        let allowed = match (&state.config.admin_key, &request.admin_key) {
            (Some(expected), Some(given)) => constant_time_eq(expected, given),
            _ => false,
        };

        if !allowed {
            return Err(LedgerError::Forbidden("admin signup needs a valid admin key".into()).into());
        }
    }

    let ttl = state.config.session_ttl;
    let now = Utc::now();

    let (session, user) = state
        .store
        .write(|ledger| {
            let user = ledger.register(request.into_new_user(), now)?;
            let session = ledger.open_session(&user.id, ttl, now)?;
            Ok::<_, LedgerError>((session, PublicUser::from(&user)))
        })
        .await?;

    Ok((StatusCode::CREATED, Json(SessionResponse::new(session, user))))
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, AppError> {
    let request = payload(body)?;
    let ttl = state.config.session_ttl;
    let now = Utc::now();

    let (session, user) = state
        .store
        .write(|ledger| {
            let user = PublicUser::from(ledger.authenticate(&request.email, &request.password)?);
            let session = ledger.open_session(&user.id, ttl, now)?;
            Ok::<_, LedgerError>((session, user))
        })
        .await?;

    info!("User {} logged in", user.id);

    Ok(Json(SessionResponse::new(session, user)))
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    state
        .store
        .write(|ledger| Ok::<_, LedgerError>(ledger.close_session(&auth.token)))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn me_handler(auth: AuthUser) -> Json<PublicUser> {
    Json(PublicUser::from(&auth.user))
}
