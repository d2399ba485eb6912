use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest,
            MessageResponse, PublicUser, RefreshRequest, RegisterRequest, ResetPasswordRequest,
        },
        repo::NewUser,
        repo_types::User,
        services::{hash_password, is_valid_email, verify_password, AuthUser, JwtKeys},
    },
    reset::codes,
    state::AppState,
};

/// Same wording whether or not the address is registered.
const RESET_REQUESTED: &str =
    "If that email is registered, a reset code has been sent; it is valid for 15 minutes";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), (StatusCode, String)> {
    payload.username = payload.username.trim().to_string();
    payload.name = payload.name.trim().to_string();
    payload.student_id = payload.student_id.trim().to_string();
    payload.class_name = payload.class_name.trim().to_string();
    payload.grade = payload.grade.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();
    payload.phone = payload.phone.trim().to_string();

    if payload.username.chars().count() < 3 || payload.username.chars().count() > 30 {
        warn!(username = %payload.username, "invalid username length");
        return Err((
            StatusCode::BAD_REQUEST,
            "Username must be 3-30 characters".into(),
        ));
    }

    if payload.name.is_empty()
        || payload.student_id.is_empty()
        || payload.class_name.is_empty()
        || payload.grade.is_empty()
        || payload.phone.is_empty()
    {
        warn!("missing required profile field");
        return Err((
            StatusCode::BAD_REQUEST,
            "Name, student id, class, grade and phone are required".into(),
        ));
    }

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    if payload.password.len() < 6 {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    // Username, email and student id must all be unique
    if let Ok(Some(_)) = User::find_conflicting(
        &state.db,
        &payload.username,
        &payload.email,
        &payload.student_id,
    )
    .await
    {
        warn!(username = %payload.username, "identity already registered");
        return Err((
            StatusCode::CONFLICT,
            "Username, email or student id already registered".into(),
        ));
    }

    let hash = match hash_password(&payload.password) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "hash_password failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let user = match User::create(
        &state.db,
        &NewUser {
            username: &payload.username,
            name: &payload.name,
            student_id: &payload.student_id,
            class_name: &payload.class_name,
            grade: &payload.grade,
            email: &payload.email,
            phone: &payload.phone,
            password_hash: &hash,
            is_member: payload.is_member,
        },
    )
    .await
    {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Registration successful".into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    payload.username = payload.username.trim().to_string();

    if payload.username.is_empty() || payload.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Username and password are required".into(),
        ));
    }

    let user = match User::find_by_username(&state.db, &payload.username).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(username = %payload.username, "login unknown username");
            return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
        }
        Err(e) => {
            error!(error = %e, "find_by_username failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let ok = match verify_password(&payload.password, &user.password_hash) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "verify_password failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    if !ok {
        warn!(username = %payload.username, user_id = %user.id, "login invalid password");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let access_token = match keys.sign_access(user.id) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "jwt sign access failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };
    let refresh_token = match keys.sign_refresh(user.id) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "jwt sign refresh failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| (StatusCode::UNAUTHORIZED, format!("{}", e)))?;

    // Issue new pair
    let access_token = keys
        .sign_access(claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let refresh_token = keys
        .sign_refresh(claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".to_string()))?;

    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let user = User::find_by_id(&state.db, user_id)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = %user_id, "find_by_id failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".to_string()))?;

    Ok(Json(PublicUser::from(user)))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<ForgotPasswordResponse>, (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    let user = match User::find_by_email(&state.db, &payload.email).await {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let Some(user) = user else {
        info!(email = %payload.email, "reset requested for unregistered email");
        return Ok(Json(ForgotPasswordResponse {
            message: RESET_REQUESTED.into(),
            code: None,
        }));
    };

    let code = codes::generate_code();
    state.reset_codes.save(&user.email, &code);

    // Delivery failure leaves the saved code valid; it only shows up in logs
    let mailer = Arc::clone(&state.mailer);
    let (to, name, sent_code) = (user.email.clone(), user.name.clone(), code.clone());
    tokio::spawn(async move {
        if let Err(e) = mailer.send_reset_code(&to, &name, &sent_code).await {
            error!(error = %e, email = %to, "failed to send reset code");
        }
    });

    info!(user_id = %user.id, "reset code issued");
    Ok(Json(ForgotPasswordResponse {
        message: RESET_REQUESTED.into(),
        code: state.config.expose_reset_codes.then_some(code),
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();
    payload.code = payload.code.trim().to_string();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    if payload.code.len() != 6 || !payload.code.chars().all(|c| c.is_ascii_digit()) {
        return Err((StatusCode::BAD_REQUEST, "Code must be 6 digits".into()));
    }

    if payload.new_password.len() < 6 {
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    if let Err(outcome) = state.reset_codes.verify(&payload.email, &payload.code) {
        warn!(email = %payload.email, outcome = %outcome, "reset code rejected");
        return Err((StatusCode::BAD_REQUEST, outcome.to_string()));
    }

    let user = match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %payload.email, "reset for missing account");
            return Err((StatusCode::NOT_FOUND, "Account not found".into()));
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let hash = match hash_password(&payload.new_password) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "hash_password failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    if let Err(e) = User::update_password(&state.db, user.id, &hash).await {
        error!(error = %e, user_id = %user.id, "update_password failed");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
    }

    info!(user_id = %user.id, "password reset");
    Ok(Json(MessageResponse {
        message: "Password reset, sign in with your new password".into(),
    }))
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn forgot_password_response_hides_code_when_absent() {
        let response = ForgotPasswordResponse {
            message: RESET_REQUESTED.into(),
            code: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("\"code\""));
    }

    #[test]
    fn forgot_password_response_echoes_code_in_dev_mode() {
        let response = ForgotPasswordResponse {
            message: RESET_REQUESTED.into(),
            code: Some("482913".into()),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"code\""));
        assert!(json.contains("482913"));
    }
}
