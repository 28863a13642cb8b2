//! Role-scoped credential sign-in endpoints.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::{Account, Role};
use crate::error::Result;
use crate::router::{TOKEN_TYPE, Valid};
use crate::token::SESSION_EXPIRATION_TIME;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
    pub mobile_number: Option<String>,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub message: String,
    pub token_type: String,
    pub token: String,
    pub expires_in: u64,
    pub user: Account,
}

/// Handler for `POST /login/director`.
pub async fn director(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    login(state, Role::Director, body).await
}

/// Handler for `POST /login/artist`.
pub async fn artist(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    login(state, Role::Artist, body).await
}

async fn login(
    state: AppState,
    role: Role,
    body: Body,
) -> Result<Json<Response>> {
    let session = state
        .registry
        .login(
            role,
            body.email.as_deref(),
            body.mobile_number.as_deref(),
            &body.password,
        )
        .await?;

    Ok(Json(Response {
        message: format!("Welcome back, {}!", session.account.display_name()),
        token_type: TOKEN_TYPE.to_owned(),
        token: session.token,
        expires_in: SESSION_EXPIRATION_TIME,
        user: session.account,
    }))
}
