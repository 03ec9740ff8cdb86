//! The HTTP surface: observation intake, trial acks, and admin commands.
//!
//! `/observe/{id}` and `/ack/{trial_id}` are deliberately unauthenticated:
//! the unguessable id *is* the capability. Only `/admin/*` is gated, by a
//! bearer token compared in constant time.
//!
//! Every handler runs under a hard deadline so a wedged store cannot pin
//! connections open indefinitely; instrumented jobs are expected to retry on
//! any 5xx.

mod error;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::info;

use rewire_core::expectation::MIN_EXPECTED_INTERVAL_S;
use rewire_core::{ExpectationKind, ExpectationParams, ObservationKind};

use crate::store::{NewExpectation, Store};
use crate::token::url_safe_token;
use crate::trials::TrialManager;

/// Hard per-request deadline.
const REQUEST_DEADLINE: Duration = Duration::from_secs(10);

/// How many observations `GET /observe/{id}` returns.
const OBSERVE_GET_LIMIT: usize = 10;

/// Shared state behind every handler.
pub struct ApiContext {
    pub store: Store,
    pub trials: TrialManager,
    pub admin_token: SecretString,
    pub base_url: String,
}

/// Build the daemon's router.
pub fn router(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/observe/{id}", post(observe_post).get(observe_get))
        .route("/ack/{trial_id}", get(ack))
        .route("/admin/new", post(admin_new))
        .route("/admin/enable", post(admin_enable))
        .route("/admin/disable", post(admin_disable))
        .layer(middleware::from_fn(deadline))
        .with_state(ctx)
}

/// Enforce [`REQUEST_DEADLINE`] on every request.
async fn deadline(request: Request, next: Next) -> Response {
    match tokio::time::timeout(REQUEST_DEADLINE, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::Timeout.into_response(),
    }
}

async fn status() -> &'static str {
    "rewire ok\n"
}

#[derive(Debug, Deserialize)]
struct ObserveForm {
    #[serde(default)]
    kind: String,
    meta: Option<String>,
}

async fn observe_post(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
    Form(form): Form<ObserveForm>,
) -> Result<&'static str, ApiError> {
    if ctx.store.get_expectation(&id)?.is_none() {
        return Err(ApiError::NotFound);
    }
    let kind: ObservationKind = form.kind.trim().parse().map_err(|_| ApiError::InvalidKind)?;
    ctx.store.append_observation(&id, kind, form.meta.as_deref())?;
    Ok("ok\n")
}

async fn observe_get(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let exp = ctx.store.get_expectation(&id)?.ok_or(ApiError::NotFound)?;
    let observations = ctx.store.recent_observations(&id, OBSERVE_GET_LIMIT)?;

    let params: serde_json::Value =
        serde_json::from_str(&exp.params_json).unwrap_or(serde_json::Value::Null);

    Ok(Json(json!({
        "id": exp.id,
        "type": exp.kind,
        "name": exp.name,
        "owner_contact": exp.owner_contact,
        "expected_interval_s": exp.expected_interval_s,
        "tolerance_s": exp.tolerance_s,
        "params": params,
        "is_enabled": exp.enabled,
        "recent_observations": observations
            .iter()
            .map(|o| json!({
                "kind": o.kind,
                "observed_at": o.observed_at,
                "meta": o.meta,
            }))
            .collect::<Vec<_>>(),
    })))
}

async fn ack(
    State(ctx): State<Arc<ApiContext>>,
    Path(trial_id): Path<String>,
) -> Result<&'static str, ApiError> {
    if ctx.trials.ack(&trial_id)? {
        Ok("acked\n")
    } else {
        Err(ApiError::NotFound)
    }
}

/// Constant-time bearer-token check for `/admin/*`.
fn require_admin(ctx: &ApiContext, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(ApiError::Unauthorized)?;

    let expected = ctx.admin_token.expose_secret();
    if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
struct NewExpectationForm {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    contact: String,
    expected_interval_s: Option<i64>,
    tolerance_s: Option<i64>,
    params_json: Option<String>,
}

async fn admin_new(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Form(form): Form<NewExpectationForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&ctx, &headers)?;

    let kind: ExpectationKind = form
        .kind
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation("type must be schedule|alert_path".into()))?;

    let name = form.name.trim();
    let contact = form.contact.trim();
    if name.is_empty() || contact.is_empty() {
        return Err(ApiError::Validation("need name and contact".into()));
    }

    let expected_interval_s = form.expected_interval_s.unwrap_or(0);
    if expected_interval_s < MIN_EXPECTED_INTERVAL_S {
        return Err(ApiError::Validation(format!(
            "expected_interval_s must be >= {MIN_EXPECTED_INTERVAL_S}"
        )));
    }
    let tolerance_s = form.tolerance_s.unwrap_or(0);
    if tolerance_s < 0 {
        return Err(ApiError::Validation("tolerance_s must be >= 0".into()));
    }

    let params_json = form.params_json.unwrap_or_else(|| "{}".to_string());
    ExpectationParams::parse(kind, &params_json)
        .map_err(|e| ApiError::Validation(format!("invalid params_json: {e}")))?;

    let id = url_safe_token();
    ctx.store.create_expectation(&NewExpectation {
        id: id.clone(),
        kind,
        name: name.to_string(),
        owner_contact: contact.to_string(),
        expected_interval_s,
        tolerance_s,
        params_json,
    })?;

    info!(expectation_id = %id, kind = %kind, "expectation created via admin API");
    Ok(Json(json!({
        "id": id,
        "observe_url": format!("{}/observe/{id}", ctx.base_url.trim_end_matches('/')),
    })))
}

#[derive(Debug, Deserialize)]
struct EnableForm {
    #[serde(default)]
    id: String,
}

async fn admin_enable(
    state: State<Arc<ApiContext>>,
    headers: HeaderMap,
    form: Form<EnableForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    set_enabled(state, headers, form, true).await
}

async fn admin_disable(
    state: State<Arc<ApiContext>>,
    headers: HeaderMap,
    form: Form<EnableForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    set_enabled(state, headers, form, false).await
}

async fn set_enabled(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Form(form): Form<EnableForm>,
    enabled: bool,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&ctx, &headers)?;
    let id = form.id.trim();
    if id.is_empty() {
        return Err(ApiError::Validation("need id".into()));
    }
    if !ctx.store.set_enabled(id, enabled)? {
        return Err(ApiError::NotFound);
    }
    info!(expectation_id = %id, enabled, "expectation toggled via admin API");
    Ok(Json(json!({ "ok": true, "enabled": enabled })))
}

#[cfg(test)]
mod tests {
    use rewire_core::ManualClock;

    use super::*;

    fn test_ctx() -> Arc<ApiContext> {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Store::open_in_memory(clock).unwrap();
        let trials = TrialManager::new(store.clone(), "http://localhost:8080");
        Arc::new(ApiContext {
            store,
            trials,
            admin_token: SecretString::from("test-admin-token"),
            base_url: "http://localhost:8080".into(),
        })
    }

    fn admin_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    async fn create_schedule(ctx: &Arc<ApiContext>) -> String {
        let response = admin_new(
            State(Arc::clone(ctx)),
            admin_headers("test-admin-token"),
            Form(NewExpectationForm {
                kind: "schedule".into(),
                name: "nightly-backup".into(),
                contact: "ops@example.com".into(),
                expected_interval_s: Some(3600),
                tolerance_s: Some(60),
                params_json: Some(r#"{"max_runtime_s":1800}"#.into()),
            }),
        )
        .await
        .expect("admin_new succeeds");
        response.0["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_status() {
        assert_eq!(status().await, "rewire ok\n");
    }

    #[tokio::test]
    async fn test_observe_post_round_trip() {
        let ctx = test_ctx();
        let id = create_schedule(&ctx).await;

        let body = observe_post(
            State(Arc::clone(&ctx)),
            Path(id.clone()),
            Form(ObserveForm {
                kind: "start".into(),
                meta: Some("{\"host\":\"db1\"}".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body, "ok\n");

        let obs = ctx.store.recent_observations(&id, 10).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].kind, ObservationKind::Start);
    }

    #[tokio::test]
    async fn test_observe_post_bad_kind_is_400() {
        let ctx = test_ctx();
        let id = create_schedule(&ctx).await;

        let result = observe_post(
            State(ctx),
            Path(id),
            Form(ObserveForm {
                kind: "begin".into(),
                meta: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::InvalidKind)));
    }

    #[tokio::test]
    async fn test_observe_post_unknown_expectation_is_404() {
        let ctx = test_ctx();
        let result = observe_post(
            State(ctx),
            Path("ghost".into()),
            Form(ObserveForm {
                kind: "start".into(),
                meta: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn test_observe_get_shape() {
        let ctx = test_ctx();
        let id = create_schedule(&ctx).await;
        ctx.store
            .append_observation(&id, ObservationKind::Start, None)
            .unwrap();

        let Json(body) = observe_get(State(ctx), Path(id.clone())).await.unwrap();
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["type"], "schedule");
        assert_eq!(body["params"]["max_runtime_s"], 1800);
        assert_eq!(body["recent_observations"].as_array().unwrap().len(), 1);
        assert_eq!(body["recent_observations"][0]["kind"], "start");
    }

    #[tokio::test]
    async fn test_ack_first_success_then_404() {
        let ctx = test_ctx();
        let id = create_schedule(&ctx).await;
        let issued = ctx.trials.issue(&id).unwrap();

        let body = ack(State(Arc::clone(&ctx)), Path(issued.trial_id.clone()))
            .await
            .unwrap();
        assert_eq!(body, "acked\n");

        let again = ack(State(Arc::clone(&ctx)), Path(issued.trial_id)).await;
        assert!(matches!(again, Err(ApiError::NotFound)));

        let unknown = ack(State(ctx), Path("nope".into())).await;
        assert!(matches!(unknown, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let ctx = test_ctx();

        let missing = admin_new(
            State(Arc::clone(&ctx)),
            HeaderMap::new(),
            Form(NewExpectationForm {
                kind: "schedule".into(),
                name: "n".into(),
                contact: "c@example.com".into(),
                expected_interval_s: Some(60),
                tolerance_s: None,
                params_json: None,
            }),
        )
        .await;
        assert!(matches!(missing, Err(ApiError::Unauthorized)));

        let wrong = admin_new(
            State(ctx),
            admin_headers("wrong-token"),
            Form(NewExpectationForm {
                kind: "schedule".into(),
                name: "n".into(),
                contact: "c@example.com".into(),
                expected_interval_s: Some(60),
                tolerance_s: None,
                params_json: None,
            }),
        )
        .await;
        assert!(matches!(wrong, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_admin_new_validates_inputs() {
        let ctx = test_ctx();
        let headers = admin_headers("test-admin-token");

        let bad_type = admin_new(
            State(Arc::clone(&ctx)),
            headers.clone(),
            Form(NewExpectationForm {
                kind: "cron".into(),
                name: "n".into(),
                contact: "c@example.com".into(),
                expected_interval_s: Some(60),
                tolerance_s: None,
                params_json: None,
            }),
        )
        .await;
        assert!(matches!(bad_type, Err(ApiError::Validation(_))));

        let short_interval = admin_new(
            State(Arc::clone(&ctx)),
            headers.clone(),
            Form(NewExpectationForm {
                kind: "schedule".into(),
                name: "n".into(),
                contact: "c@example.com".into(),
                expected_interval_s: Some(30),
                tolerance_s: None,
                params_json: None,
            }),
        )
        .await;
        assert!(matches!(short_interval, Err(ApiError::Validation(_))));

        let bad_params = admin_new(
            State(ctx),
            headers,
            Form(NewExpectationForm {
                kind: "alert_path".into(),
                name: "n".into(),
                contact: "c@example.com".into(),
                expected_interval_s: Some(3600),
                tolerance_s: None,
                params_json: Some("{}".into()),
            }),
        )
        .await;
        assert!(matches!(bad_params, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_admin_enable_disable() {
        let ctx = test_ctx();
        let id = create_schedule(&ctx).await;
        let headers = admin_headers("test-admin-token");

        let Json(body) = admin_disable(
            State(Arc::clone(&ctx)),
            headers.clone(),
            Form(EnableForm { id: id.clone() }),
        )
        .await
        .unwrap();
        assert_eq!(body["enabled"], false);
        assert!(ctx.store.list_enabled().unwrap().is_empty());

        let Json(body) = admin_enable(
            State(Arc::clone(&ctx)),
            headers.clone(),
            Form(EnableForm { id: id.clone() }),
        )
        .await
        .unwrap();
        assert_eq!(body["enabled"], true);
        assert_eq!(ctx.store.list_enabled().unwrap().len(), 1);

        let unknown = admin_enable(
            State(ctx),
            headers,
            Form(EnableForm { id: "ghost".into() }),
        )
        .await;
        assert!(matches!(unknown, Err(ApiError::NotFound)));
    }
}
