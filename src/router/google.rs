//! Federated (Google) sign-in endpoint.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::login::Response;
use crate::router::{TOKEN_TYPE, Valid};
use crate::token::SESSION_EXPIRATION_TIME;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 1, message = "Google ID token is required."))]
    pub token_id: String,
}

/// Handler for `POST /login/google`.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let session = state.registry.federated_login(&body.token_id).await?;

    Ok(Json(Response {
        message: "Login successful.".to_owned(),
        token_type: TOKEN_TYPE.to_owned(),
        token: session.token,
        expires_in: SESSION_EXPIRATION_TIME,
        user: session.account,
    }))
}
