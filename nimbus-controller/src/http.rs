use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use nimbus_common::RequestContext;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::controller::CloudController;
use crate::error::ControllerError;
use crate::provisioning::RunInstancesRequest;
use crate::volumes::{CreateVolumeRequest, UpdateDisplayRequest};

type AppState = Arc<CloudController>;

impl ControllerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ControllerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ControllerError::Duplicate { .. } => StatusCode::CONFLICT,
            ControllerError::Dispatch(_) => StatusCode::BAD_GATEWAY,
            ControllerError::Store(_) | ControllerError::KeyGeneration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ControllerError::QuotaExceeded(_)
            | ControllerError::InvalidState(_)
            | ControllerError::NotAttached(_)
            | ControllerError::NoFixedIp(_)
            | ControllerError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(json!({ "error": self.code(), "message": self.to_string() })),
        )
            .into_response()
    }
}

/// Caller identity from `X-Tenant-Id`, `X-User-Id`, `X-Admin` and optional
/// `X-Request-Id`. Authentication happens in front of this service.
pub struct Caller(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let (Some(tenant_id), Some(user_id)) = (header("x-tenant-id"), header("x-user-id")) else {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized", "message": "missing caller identity"})),
            ));
        };
        let is_admin = header("x-admin")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        let request_id = header("x-request-id")
            .and_then(|v| Uuid::parse_str(&v).ok())
            .unwrap_or_else(Uuid::new_v4);
        Ok(Caller(RequestContext {
            tenant_id,
            user_id,
            is_admin,
            request_id,
        }))
    }
}

pub fn create_router(controller: Arc<CloudController>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/instances", get(describe_instances).post(run_instances))
        .route("/instances/terminate", post(terminate_instances))
        .route("/instances/reboot", post(reboot_instances))
        .route("/instances/{instance_id}", patch(update_instance))
        .route("/instances/{instance_id}/console", get(get_console_output))
        .route("/volumes", get(describe_volumes).post(create_volume))
        .route(
            "/volumes/{volume_id}",
            patch(update_volume).delete(delete_volume),
        )
        .route("/volumes/{volume_id}/attach", post(attach_volume))
        .route("/volumes/{volume_id}/detach", post(detach_volume))
        .route("/addresses", get(describe_addresses).post(allocate_address))
        .route("/addresses/{public_ip}", axum::routing::delete(release_address))
        .route("/addresses/{public_ip}/associate", post(associate_address))
        .route("/addresses/{public_ip}/disassociate", post(disassociate_address))
        .route("/key_pairs", get(describe_key_pairs).post(create_key_pair))
        .route("/key_pairs/{name}", axum::routing::delete(delete_key_pair))
        .route("/availability_zones", get(describe_availability_zones))
        .route("/regions", get(describe_regions))
        .route("/metadata/{address}", get(get_metadata))
        .with_state(controller)
}

async fn root() -> &'static str {
    "nimbus cloud controller"
}

#[derive(Debug, Deserialize)]
struct InstanceIdsBody {
    instance_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AttachBody {
    instance_id: String,
    device: String,
}

#[derive(Debug, Deserialize)]
struct AssociateBody {
    instance_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateKeyPairBody {
    name: String,
}

/// `?name=a,b` filter shared by key pairs and regions.
#[derive(Debug, Deserialize)]
struct NameFilter {
    name: Option<String>,
}

impl NameFilter {
    fn names(&self) -> Option<Vec<String>> {
        self.name.as_ref().map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

async fn run_instances(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<RunInstancesRequest>,
) -> Result<impl IntoResponse, ControllerError> {
    let reservation = controller.run_instances(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn describe_instances(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
) -> Result<impl IntoResponse, ControllerError> {
    Ok(Json(controller.describe_instances(&ctx).await?))
}

async fn terminate_instances(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Json(body): Json<InstanceIdsBody>,
) -> Result<impl IntoResponse, ControllerError> {
    controller.terminate_instances(&ctx, &body.instance_ids).await?;
    Ok(Json(json!({ "return": true })))
}

async fn reboot_instances(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Json(body): Json<InstanceIdsBody>,
) -> Result<impl IntoResponse, ControllerError> {
    controller.reboot_instances(&ctx, &body.instance_ids).await?;
    Ok(Json(json!({ "return": true })))
}

async fn update_instance(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(instance_id): Path<String>,
    Json(req): Json<UpdateDisplayRequest>,
) -> Result<impl IntoResponse, ControllerError> {
    controller.update_instance(&ctx, &instance_id, req).await?;
    Ok(Json(json!({ "return": true })))
}

async fn get_console_output(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(instance_id): Path<String>,
) -> Result<impl IntoResponse, ControllerError> {
    let output = controller.get_console_output(&ctx, &instance_id).await?;
    Ok(Json(json!({ "instance_id": instance_id, "output": output })))
}

async fn create_volume(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Json(req): Json<CreateVolumeRequest>,
) -> Result<impl IntoResponse, ControllerError> {
    let volume = controller.create_volume(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(volume)))
}

async fn describe_volumes(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
) -> Result<impl IntoResponse, ControllerError> {
    Ok(Json(controller.describe_volumes(&ctx).await?))
}

async fn update_volume(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(volume_id): Path<String>,
    Json(req): Json<UpdateDisplayRequest>,
) -> Result<impl IntoResponse, ControllerError> {
    controller.update_volume(&ctx, &volume_id, req).await?;
    Ok(Json(json!({ "return": true })))
}

async fn delete_volume(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(volume_id): Path<String>,
) -> Result<impl IntoResponse, ControllerError> {
    controller.delete_volume(&ctx, &volume_id).await?;
    Ok(Json(json!({ "return": true })))
}

async fn attach_volume(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(volume_id): Path<String>,
    Json(body): Json<AttachBody>,
) -> Result<impl IntoResponse, ControllerError> {
    Ok(Json(
        controller
            .attach_volume(&ctx, &volume_id, &body.instance_id, &body.device)
            .await?,
    ))
}

async fn detach_volume(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(volume_id): Path<String>,
) -> Result<impl IntoResponse, ControllerError> {
    Ok(Json(controller.detach_volume(&ctx, &volume_id).await?))
}

async fn allocate_address(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
) -> Result<impl IntoResponse, ControllerError> {
    let public_ip = controller.allocate_address(&ctx).await?;
    Ok((StatusCode::CREATED, Json(json!({ "public_ip": public_ip }))))
}

async fn describe_addresses(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
) -> Result<impl IntoResponse, ControllerError> {
    Ok(Json(controller.describe_addresses(&ctx).await?))
}

async fn release_address(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(public_ip): Path<String>,
) -> Result<impl IntoResponse, ControllerError> {
    controller.release_address(&ctx, &public_ip).await?;
    Ok(Json(json!({ "return": true })))
}

async fn associate_address(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(public_ip): Path<String>,
    Json(body): Json<AssociateBody>,
) -> Result<impl IntoResponse, ControllerError> {
    controller
        .associate_address(&ctx, &body.instance_id, &public_ip)
        .await?;
    Ok(Json(json!({ "return": true })))
}

async fn disassociate_address(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(public_ip): Path<String>,
) -> Result<impl IntoResponse, ControllerError> {
    controller.disassociate_address(&ctx, &public_ip).await?;
    Ok(Json(json!({ "return": true })))
}

async fn create_key_pair(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Json(body): Json<CreateKeyPairBody>,
) -> Result<impl IntoResponse, ControllerError> {
    let created = controller.keypairs().create_key_pair(&ctx, &body.name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn describe_key_pairs(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Query(filter): Query<NameFilter>,
) -> Result<impl IntoResponse, ControllerError> {
    let names = filter.names();
    Ok(Json(
        controller
            .keypairs()
            .describe_key_pairs(&ctx, names.as_deref())
            .await?,
    ))
}

async fn delete_key_pair(
    State(controller): State<AppState>,
    Caller(ctx): Caller,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ControllerError> {
    controller.keypairs().delete_key_pair(&ctx, &name).await?;
    Ok(Json(json!({ "return": true })))
}

async fn describe_availability_zones(
    State(controller): State<AppState>,
    Caller(_ctx): Caller,
) -> impl IntoResponse {
    Json(controller.describe_availability_zones())
}

async fn describe_regions(
    State(controller): State<AppState>,
    Caller(_ctx): Caller,
    Query(filter): Query<NameFilter>,
) -> impl IntoResponse {
    let names = filter.names();
    Json(controller.describe_regions(names.as_deref()))
}

/// Served to instances themselves, so no caller identity is required.
async fn get_metadata(
    State(controller): State<AppState>,
    Path(address): Path<String>,
) -> Result<Response, ControllerError> {
    match controller.get_metadata(&address).await? {
        Some(metadata) => Ok(Json(metadata).into_response()),
        None => Err(ControllerError::not_found("fixed_ip", address)),
    }
}
