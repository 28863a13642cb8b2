//! Email verification endpoint.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::Role;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    /// Six-digit code, accepted as a JSON number or a numeric string.
    #[serde(deserialize_with = "deserialize_otp")]
    #[validate(range(max = 999_999, message = "OTP must be a 6-digit code."))]
    pub otp: u32,
    #[validate(length(min = 1, message = "Activation token is required."))]
    pub activation_token: String,
}

fn deserialize_otp<'de, D>(
    deserializer: D,
) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(otp) => Ok(otp),
        Raw::Text(otp) => otp.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    pub role: Role,
}

/// Handler to confirm control of a registered email address.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let role = state
        .registry
        .verify(body.otp, &body.activation_token)
        .await?;

    Ok(Json(Response {
        success: true,
        message: "Account verified successfully.".to_owned(),
        role,
    }))
}
