use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::config::Config;
use crate::error::{Error, ErrorBody, Result};
use crate::middleware::client_ip_from_headers;
use crate::models::{ScanDirection, SignedPayload};
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::redemption::{RedemptionCoordinator, RedemptionOutcome};
use crate::scan::{Role, ScanAlert, ScanGate, ScanOutcome, ScanRejection, SubjectSummary};
use crate::scheduler::scheduled_state;
use crate::signature::SignatureService;
use crate::store::Store;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Application state wiring the core components together
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub coordinator: RedemptionCoordinator,
    pub scan_gate: ScanGate,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        let signatures = Arc::new(
            SignatureService::new(
                config.signing_secrets.clone(),
                config.current_signature_version,
            )
            .map_err(|e| Error::Configuration(e.to_string()))?,
        );

        let coordinator = RedemptionCoordinator::new(store.clone(), signatures.clone());
        let scan_gate = ScanGate::new(
            store.clone(),
            signatures,
            config.venue_timezone,
            config.replay_window_secs,
            config.max_scan_skew_secs,
        );

        Ok(Self {
            config,
            store,
            coordinator,
            scan_gate,
            rate_limiter: RateLimiter::new(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PrizeSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub prize: PrizeSummary,
    pub redeemed_at: chrono::DateTime<chrono::Utc>,
    pub signature_version: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ScanRequest {
    Signed {
        payload: SignedPayload,
        direction: ScanDirection,
        device_id: Option<String>,
    },
    Bare {
        code: String,
        direction: ScanDirection,
        device_id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub subject: SubjectSummary,
    pub direction: ScanDirection,
    pub alerts: Vec<ScanAlert>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub tokens_enabled: bool,
    pub should_be_open: bool,
    pub next_boundary: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
}

/// Redeem a token by id
pub async fn redeem_token(
    State(state): State<SharedState>,
    Path(token_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response> {
    throttle(&state, &headers, "redeem")?;

    let outcome = state.coordinator.redeem(token_id).await?;

    let response = match outcome {
        RedemptionOutcome::Success {
            prize,
            redeemed_at,
            signature_version,
        } => Json(RedeemResponse {
            prize: PrizeSummary {
                id: prize.id,
                name: prize.name,
            },
            redeemed_at,
            signature_version,
        })
        .into_response(),
        other => {
            let status = redemption_status(&other);
            let body = ErrorBody::new(other.code(), redemption_message(&other), status.as_u16());
            (status, Json(body)).into_response()
        }
    };

    Ok(response)
}

/// Record an attendance scan, signed-payload or bare-code path
pub async fn scan(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<ScanRequest>,
) -> Result<Response> {
    throttle(&state, &headers, "scan")?;

    let outcome = match request {
        ScanRequest::Signed {
            payload,
            direction,
            device_id,
        } => {
            state
                .scan_gate
                .scan_signed(&payload, direction, device_id)
                .await?
        }
        ScanRequest::Bare {
            code,
            direction,
            device_id,
        } => {
            // Bare codes carry no cryptography; an authenticated staff
            // session is the trust anchor instead.
            let role = role_from_headers(&headers, &state.config).ok_or(Error::Forbidden)?;
            state
                .scan_gate
                .scan_code(&code, direction, device_id, role)
                .await?
        }
    };

    let response = match outcome {
        ScanOutcome::Accepted {
            subject,
            direction,
            alerts,
        } => Json(ScanResponse {
            subject,
            direction,
            alerts,
        })
        .into_response(),
        ScanOutcome::Rejected(rejection) => {
            let status = scan_status(rejection);
            let body = ErrorBody::new(rejection.code(), scan_message(rejection), status.as_u16());
            (status, Json(body)).into_response()
        }
    };

    Ok(response)
}

/// Current availability flag plus the advisory schedule computation
pub async fn get_availability(State(state): State<SharedState>) -> Result<Json<AvailabilityResponse>> {
    let config = state.store.system_config().await?;
    let schedule = scheduled_state(
        chrono::Utc::now(),
        state.config.venue_timezone,
        state.config.open_time,
        state.config.close_time,
    );

    Ok(Json(AvailabilityResponse {
        tokens_enabled: config.tokens_enabled,
        should_be_open: schedule.should_be_open,
        next_boundary: schedule.next_boundary.to_rfc3339(),
    }))
}

/// Manual availability override; persists until the next boundary job
pub async fn set_availability(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Json<AvailabilityResponse>> {
    match role_from_headers(&headers, &state.config) {
        Some(Role::Admin) => {}
        Some(_) => return Err(Error::Forbidden),
        None => return Err(Error::Unauthorized),
    }

    state.store.set_tokens_enabled(request.enabled).await?;
    let outcome = if request.enabled { "MANUAL_ON" } else { "MANUAL_OFF" };
    state
        .store
        .append_audit(AuditEntry::availability(outcome))
        .await?;

    tracing::info!(
        target: "prizegate::availability",
        tokens_enabled = request.enabled,
        "availability flag manually overridden"
    );

    let schedule = scheduled_state(
        chrono::Utc::now(),
        state.config.venue_timezone,
        state.config.open_time,
        state.config.close_time,
    );

    Ok(Json(AvailabilityResponse {
        tokens_enabled: request.enabled,
        should_be_open: schedule.should_be_open,
        next_boundary: schedule.next_boundary.to_rfc3339(),
    }))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn throttle(state: &AppState, headers: &HeaderMap, operation: &str) -> Result<()> {
    let key = format!("{}:{}", operation, client_ip_from_headers(headers));
    match state.rate_limiter.check(
        &key,
        state.config.rate_limit,
        state.config.rate_limit_window_ms,
    )? {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Denied { retry_after_secs } => Err(Error::RateLimited { retry_after_secs }),
    }
}

fn role_from_headers(headers: &HeaderMap, config: &Config) -> Option<Role> {
    let token = headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?;

    if token == config.admin_token {
        Some(Role::Admin)
    } else if token == config.staff_token {
        Some(Role::Staff)
    } else {
        None
    }
}

fn redemption_status(outcome: &RedemptionOutcome) -> StatusCode {
    match outcome {
        RedemptionOutcome::Success { .. } => StatusCode::OK,
        RedemptionOutcome::NotFound => StatusCode::NOT_FOUND,
        RedemptionOutcome::Inactive
        | RedemptionOutcome::TooEarly { .. }
        | RedemptionOutcome::AlreadyRedeemed => StatusCode::CONFLICT,
        RedemptionOutcome::Expired => StatusCode::GONE,
        RedemptionOutcome::UnknownSignatureVersion { .. } | RedemptionOutcome::BadSignature => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RedemptionOutcome::SystemOff => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn redemption_message(outcome: &RedemptionOutcome) -> &'static str {
    match outcome {
        RedemptionOutcome::Success { .. } => "Token redeemed",
        RedemptionOutcome::NotFound => "No such token",
        RedemptionOutcome::Inactive => "Token or prize is no longer active",
        RedemptionOutcome::TooEarly { .. } => "Token is not valid yet",
        RedemptionOutcome::Expired => "Token has expired",
        RedemptionOutcome::UnknownSignatureVersion { .. } => {
            "Token references an unknown signature version"
        }
        RedemptionOutcome::BadSignature => "Token signature is invalid",
        RedemptionOutcome::AlreadyRedeemed => "Token was already redeemed",
        RedemptionOutcome::SystemOff => "Redemption is currently switched off",
    }
}

fn scan_status(rejection: ScanRejection) -> StatusCode {
    match rejection {
        ScanRejection::VersionMismatch
        | ScanRejection::BadSignature
        | ScanRejection::Stale
        | ScanRejection::FutureTimestamp => StatusCode::UNPROCESSABLE_ENTITY,
        ScanRejection::PersonNotFound => StatusCode::NOT_FOUND,
        ScanRejection::PersonInactive | ScanRejection::Duplicate => StatusCode::CONFLICT,
    }
}

fn scan_message(rejection: ScanRejection) -> &'static str {
    match rejection {
        ScanRejection::VersionMismatch => "Payload version is not the currently accepted version",
        ScanRejection::BadSignature => "Payload signature is invalid",
        ScanRejection::Stale => "Payload is too old",
        ScanRejection::FutureTimestamp => "Payload is timestamped in the future",
        ScanRejection::PersonNotFound => "No matching person",
        ScanRejection::PersonInactive => "Person is inactive",
        ScanRejection::Duplicate => "Subject was scanned moments ago",
    }
}
