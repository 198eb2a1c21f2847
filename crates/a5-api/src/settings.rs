use axum::{Extension, Json, extract::State, http::StatusCode};
use tracing::{info, warn};

use a5_types::api::{Claims, SettingsResponse, UpdateSettingsRequest};

use crate::{AppState, with_db};

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SettingsResponse>, StatusCode> {
    let uid = claims.sub.to_string();
    let sealed = with_db(&state, move |db| db.get_user_api_key(&uid)).await?;

    let api_key = match sealed {
        Some(sealed) => match state.cipher.open(&sealed) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Stored provider key of {} is unreadable: {:#}", claims.username, e);
                None
            }
        },
        None => None,
    };
    Ok(Json(SettingsResponse { api_key }))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, StatusCode> {
    let api_key = Some(req.api_key.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string);

    let sealed = match &api_key {
        Some(key) => Some(state.cipher.seal(key).map_err(|e| {
            warn!("Sealing provider key failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?),
        None => None,
    };

    let uid = claims.sub.to_string();
    let updated = with_db(&state, move |db| db.set_user_api_key(&uid, sealed.as_deref())).await?;
    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }

    info!(
        "{} {} their provider key",
        claims.username,
        if api_key.is_some() { "set" } else { "cleared" }
    );
    Ok(Json(SettingsResponse { api_key }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    use a5_db::Database;
    use a5_db::secrets::SecretCipher;

    use crate::AppStateInner;

    fn state_with_user() -> (AppState, Claims) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4();
        db.create_user(&user_id.to_string(), "alice", "hash").unwrap();
        let state = Arc::new(AppStateInner {
            db,
            jwt_secret: "secret".into(),
            cipher: SecretCipher::from_secret("secret"),
        });
        let claims = Claims {
            sub: user_id,
            username: "alice".into(),
            exp: usize::MAX,
        };
        (state, claims)
    }

    async fn update(state: &AppState, claims: &Claims, key: &str) -> Result<SettingsResponse, StatusCode> {
        update_settings(
            State(state.clone()),
            Extension(claims.clone()),
            Json(UpdateSettingsRequest {
                api_key: key.into(),
            }),
        )
        .await
        .map(|Json(body)| body)
    }

    async fn read(state: &AppState, claims: &Claims) -> SettingsResponse {
        let Json(body) = get_settings(State(state.clone()), Extension(claims.clone()))
            .await
            .unwrap();
        body
    }

    #[tokio::test]
    async fn key_is_sealed_at_rest_and_read_back() {
        let (state, claims) = state_with_user();
        assert_eq!(read(&state, &claims).await.api_key, None);

        let saved = update(&state, &claims, "  sk-or-v1-abc ").await.unwrap();
        assert_eq!(saved.api_key.as_deref(), Some("sk-or-v1-abc"));

        let stored = state.db.get_user_api_key(&claims.sub.to_string()).unwrap().unwrap();
        assert!(!stored.contains("sk-or-v1-abc"));
        assert_eq!(read(&state, &claims).await.api_key.as_deref(), Some("sk-or-v1-abc"));
    }

    #[tokio::test]
    async fn blank_key_clears_the_stored_one() {
        let (state, claims) = state_with_user();
        update(&state, &claims, "sk-1").await.unwrap();

        assert_eq!(update(&state, &claims, "   ").await.unwrap().api_key, None);
        assert!(state.db.get_user_api_key(&claims.sub.to_string()).unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (state, mut claims) = state_with_user();
        claims.sub = Uuid::new_v4();
        assert_eq!(update(&state, &claims, "sk-1").await.unwrap_err(), StatusCode::NOT_FOUND);
    }
}
