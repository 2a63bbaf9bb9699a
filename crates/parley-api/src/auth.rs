use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_db::users::normalize_email;
use parley_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};

use crate::convert;
use crate::error::ApiError;
use crate::middleware::AUTH_COOKIE;
use crate::state::{AppState, AuthSettings};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_DISPLAY_NAME_LEN: usize = 64;

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    if !is_plausible_email(&email) {
        return Err(ApiError::bad_request("invalid email address"));
    }
    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ApiError::bad_request("display name must be 1-64 characters"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal
        })?
        .to_string();

    let is_admin = state.auth.admin_emails.contains(&email);
    let user = state
        .db(move |db| db.create_user(&email, &display_name, &password_hash, is_admin))
        .await?;

    info!("Registered {} ({}){}", user.email, user.id, if is_admin { " as admin" } else { "" });

    let token = create_token(&state.auth, user.id, &user.display_name)?;
    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(token.clone())),
        Json(AuthResponse {
            user: convert::profile(&user),
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.clone();
    let user = state
        .db(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    if user.login_attempts >= state.auth.max_login_attempts {
        warn!("Login refused for locked account {}", user.id);
        return Err(ApiError::Locked);
    }

    let parsed_hash = PasswordHash::new(&user.password_hash).map_err(|e| {
        error!("Stored password hash for {} is invalid: {}", user.id, e);
        ApiError::Internal
    })?;

    if Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        let user_id = user.id;
        let attempts = state.db(move |db| db.record_failed_login(user_id)).await?;
        if attempts >= state.auth.max_login_attempts {
            warn!("Account {} locked after {} failed logins", user_id, attempts);
        }
        return Err(ApiError::Unauthorized);
    }

    let user = if user.login_attempts > 0 {
        let user_id = user.id;
        state.db(move |db| db.reset_login_attempts(user_id)).await?
    } else {
        user
    };

    let token = create_token(&state.auth, user.id, &user.display_name)?;
    Ok((
        jar.add(session_cookie(token.clone())),
        Json(AuthResponse {
            user: convert::profile(&user),
            token,
        }),
    ))
}

/// Tokens are stateless; logout only clears the browser cookie.
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        jar.remove(Cookie::build(AUTH_COOKIE).path("/")),
    )
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let user = state
        .db(move |db| db.get_user(user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(Json(convert::profile(&user)))
}

pub fn create_token(
    settings: &AuthSettings,
    user_id: Uuid,
    display_name: &str,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        display_name: display_name.to_string(),
        exp: (chrono::Utc::now() + settings.token_ttl).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Token encoding failed: {}", e);
        ApiError::Internal
    })
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && email.len() <= 254 && !email.contains(' ')
        }
        None => false,
    }
}
