//! Account registration endpoint.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::{RegisterOutcome, Registration, Role};
use crate::error::{Result, ServerError};
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 1, message = "First name is required."))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required."))]
    pub last_name: String,
    #[validate(length(
        min = 6,
        max = 20,
        message = "Mobile number must be valid."
    ))]
    pub mobile_number: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(
        min = 6,
        max = 255,
        message = "Password must contain at least 6 characters."
    ))]
    pub password: String,
    #[validate(must_match(
        other = "password",
        message = "Passwords do not match."
    ))]
    pub confirm_password: String,
    #[validate(custom(
        function = "crate::router::validate_role",
        message = "Role must be either director or artist."
    ))]
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub message: String,
    /// Present on fresh registrations only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_token: Option<String>,
    /// Present on role transfers only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Handler to register an account, or transfer the role of an
/// existing one.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    // Infallible once `validate_role` passed.
    let role: Role = body.role.parse().map_err(|err: String| {
        ServerError::Internal {
            details: err,
            source: None,
        }
    })?;

    let email = body.email.clone();
    let outcome = state
        .registry
        .register(Registration {
            first_name: body.first_name,
            last_name: body.last_name,
            mobile_number: body.mobile_number,
            email: body.email,
            password: body.password,
            role,
        })
        .await?;

    let response = match outcome {
        RegisterOutcome::OtpSent { activation_token } => Response {
            message: format!("An OTP has been sent to {email}."),
            activation_token: Some(activation_token),
            role: None,
        },
        RegisterOutcome::RoleUpdated { account } => Response {
            message: "Existing account switched to the requested role."
                .to_owned(),
            activation_token: None,
            role: account.role,
        },
    };

    Ok(Json(response))
}
