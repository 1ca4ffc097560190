use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use consult_core::{
    AccessGuard, Appointment, AppointmentId, AppointmentService, AppointmentStatus, CoreConfig,
    Identity, IdentityDirectory, IdentityId, InMemoryDirectory, MessageStore, PortalError, Role,
};
use consult_realtime::{Gateway, RoomBroker};

/// Application state shared across REST and WebSocket handlers.
#[derive(Clone)]
struct AppState {
    appointments: Arc<AppointmentService>,
    store: Arc<MessageStore>,
    guard: AccessGuard,
    directory: Arc<InMemoryDirectory>,
    gateway: Gateway,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        book_appointment,
        complete_appointment,
        get_appointment,
        list_appointments,
        list_messages
    ),
    components(schemas(
        HealthRes,
        BookAppointmentReq,
        AppointmentRes,
        ListAppointmentsRes,
        CompleteAppointmentReq,
        CompleteAppointmentRes,
        ChatMessageRes,
        ListMessagesRes
    ))
)]
struct ApiDoc;

/// Main entry point for the consultation portal service.
///
/// # Environment Variables
/// - `CONSULT_REST_ADDR`: HTTP server address (default: "0.0.0.0:3000")
/// - `CONSULT_DATA_DIR`: Directory for portal data storage (default: "/portal_data")
/// - `CONSULT_IDENTITY_FILE`: Optional JSON seed for the identity directory
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("consult=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("CONSULT_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let data_dir = std::env::var("CONSULT_DATA_DIR").unwrap_or_else(|_| "/portal_data".into());

    tracing::info!("++ Starting Consult REST on {}", rest_addr);
    tracing::info!("++ Portal data directory: {}", data_dir);

    let directory = Arc::new(match std::env::var("CONSULT_IDENTITY_FILE") {
        Ok(path) => InMemoryDirectory::load_from_file(&PathBuf::from(path))?,
        Err(_) => {
            tracing::warn!("CONSULT_IDENTITY_FILE not set; starting with an empty identity directory");
            InMemoryDirectory::new()
        }
    });
    tracing::info!("++ Identity directory entries: {}", directory.len());

    let cfg = Arc::new(CoreConfig::new(PathBuf::from(data_dir)));
    let appointments = Arc::new(AppointmentService::new(
        cfg.clone(),
        directory.clone() as Arc<dyn IdentityDirectory>,
    ));
    let store = Arc::new(MessageStore::new(cfg));
    let guard = AccessGuard::new(appointments.clone());
    let broker = Arc::new(RoomBroker::new(guard.clone(), store.clone()));
    let gateway = Gateway::new(broker);

    let app = Router::new()
        .route("/health", get(health))
        .route("/appointments", get(list_appointments))
        .route("/appointments", post(book_appointment))
        .route("/appointments/:id", get(get_appointment))
        .route("/appointments/:id/complete", post(complete_appointment))
        .route("/appointments/:id/messages", get(list_messages))
        .route("/ws", get(ws_upgrade))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(AppState {
            appointments,
            store,
            guard,
            directory,
            gateway,
        });

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Request/response bodies
// ---------------------------------------------------------------------------

#[derive(serde::Serialize, utoipa::ToSchema)]
struct HealthRes {
    ok: bool,
    message: String,
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
struct BookAppointmentReq {
    doctor_id: String,
    scheduled_at: String,
    #[serde(default)]
    notes: String,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct AppointmentRes {
    id: String,
    patient_id: String,
    doctor_id: String,
    scheduled_at: String,
    status: String,
    notes: String,
    room_token: String,
    created_at: String,
}

impl From<&Appointment> for AppointmentRes {
    fn from(appointment: &Appointment) -> Self {
        Self {
            id: appointment.id.to_string(),
            patient_id: appointment.patient_id.to_string(),
            doctor_id: appointment.doctor_id.to_string(),
            scheduled_at: appointment.scheduled_at.clone(),
            status: status_name(appointment.status).to_owned(),
            notes: appointment.notes.clone(),
            room_token: appointment.room_token.to_string(),
            created_at: appointment.created_at.to_rfc3339(),
        }
    }
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct ListAppointmentsRes {
    appointments: Vec<AppointmentRes>,
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
struct CompleteAppointmentReq {
    prescription: String,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct CompleteAppointmentRes {
    id: String,
    status: String,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct ChatMessageRes {
    sequence: u64,
    sender_id: String,
    message: String,
    timestamp: String,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
struct ListMessagesRes {
    messages: Vec<ChatMessageRes>,
}

fn status_name(status: AppointmentStatus) -> &'static str {
    match status {
        AppointmentStatus::Scheduled => "Scheduled",
        AppointmentStatus::Completed => "Completed",
        AppointmentStatus::Cancelled => "Cancelled",
    }
}

type RestError = (StatusCode, &'static str);

/// Resolves the caller's identity from the `x-identity-id` header.
///
/// The surrounding session layer is trusted to have authenticated the caller;
/// this only binds the request to a directory entry.
fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, RestError> {
    let id = headers
        .get("x-identity-id")
        .and_then(|value| value.to_str().ok())
        .ok_or((StatusCode::UNAUTHORIZED, "missing x-identity-id header"))?;

    state
        .directory
        .lookup(&IdentityId::from(id))
        .ok_or((StatusCode::UNAUTHORIZED, "unknown identity"))
}

fn parse_appointment_id(raw: &str) -> Result<AppointmentId, RestError> {
    AppointmentId::parse(raw).map_err(|_| (StatusCode::BAD_REQUEST, "invalid appointment id"))
}

// ---------------------------------------------------------------------------
// REST handlers
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Consult is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/appointments",
    request_body = BookAppointmentReq,
    responses(
        (status = 200, description = "Appointment booked", body = AppointmentRes),
        (status = 400, description = "Unknown patient or doctor reference"),
        (status = 401, description = "Unknown identity"),
        (status = 403, description = "Caller is not a patient")
    )
)]
/// Book a new appointment for the calling patient.
async fn book_appointment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BookAppointmentReq>,
) -> Result<Json<AppointmentRes>, RestError> {
    let identity = resolve_identity(&state, &headers)?;
    if identity.role != Role::Patient {
        return Err((StatusCode::FORBIDDEN, "only patients may book appointments"));
    }

    match state.appointments.book(
        identity.id,
        IdentityId::from(req.doctor_id.as_str()),
        req.scheduled_at,
        req.notes,
    ) {
        Ok(appointment) => Ok(Json(AppointmentRes::from(&appointment))),
        Err(PortalError::InvalidReference { .. }) => Err((
            StatusCode::BAD_REQUEST,
            "unknown patient or doctor reference",
        )),
        Err(e) => {
            tracing::error!("Book appointment error: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
    }
}

#[utoipa::path(
    post,
    path = "/appointments/{id}/complete",
    request_body = CompleteAppointmentReq,
    params(("id" = String, Path, description = "Appointment id")),
    responses(
        (status = 200, description = "Appointment completed", body = CompleteAppointmentRes),
        (status = 403, description = "Caller is not the assigned doctor"),
        (status = 404, description = "Appointment not found"),
        (status = 409, description = "Appointment is not scheduled")
    )
)]
/// Record a prescription and mark the appointment completed.
async fn complete_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CompleteAppointmentReq>,
) -> Result<Json<CompleteAppointmentRes>, RestError> {
    let identity = resolve_identity(&state, &headers)?;
    let appointment_id = parse_appointment_id(&id)?;

    match state
        .appointments
        .complete(&appointment_id, &identity.id, req.prescription)
    {
        Ok(()) => Ok(Json(CompleteAppointmentRes {
            id: appointment_id.to_string(),
            status: status_name(AppointmentStatus::Completed).to_owned(),
        })),
        Err(PortalError::NotFound) => Err((StatusCode::NOT_FOUND, "appointment not found")),
        Err(PortalError::Forbidden) => {
            Err((StatusCode::FORBIDDEN, "not the assigned doctor"))
        }
        Err(PortalError::InvalidState) => Err((
            StatusCode::CONFLICT,
            "appointment is not in a state that allows completion",
        )),
        Err(e) => {
            tracing::error!("Complete appointment error: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/appointments/{id}",
    params(("id" = String, Path, description = "Appointment id")),
    responses(
        (status = 200, description = "Appointment record", body = AppointmentRes),
        (status = 404, description = "Appointment not found")
    )
)]
/// Fetch one appointment. Only its patient or doctor can see it; anyone else
/// receives the same not-found response as for a missing record.
async fn get_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AppointmentRes>, RestError> {
    let identity = resolve_identity(&state, &headers)?;
    let appointment_id = parse_appointment_id(&id)?;

    let appointment = load_for_party(&state, &identity, &appointment_id)?;
    Ok(Json(AppointmentRes::from(&appointment)))
}

#[utoipa::path(
    get,
    path = "/appointments",
    responses(
        (status = 200, description = "The caller's appointments", body = ListAppointmentsRes),
        (status = 401, description = "Unknown identity")
    )
)]
/// List the calling identity's appointments, newest first.
async fn list_appointments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListAppointmentsRes>, RestError> {
    let identity = resolve_identity(&state, &headers)?;

    let appointments = match identity.role {
        Role::Patient => state.appointments.list_for_patient(&identity.id),
        Role::Doctor => state.appointments.list_for_doctor(&identity.id),
        Role::Pharmacy => Vec::new(),
    };

    Ok(Json(ListAppointmentsRes {
        appointments: appointments.iter().map(AppointmentRes::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/appointments/{id}/messages",
    params(("id" = String, Path, description = "Appointment id")),
    responses(
        (status = 200, description = "Chat history in ascending order", body = ListMessagesRes),
        (status = 404, description = "Appointment not found")
    )
)]
/// Fetch the chat history for an appointment the caller is a party to.
async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ListMessagesRes>, RestError> {
    let identity = resolve_identity(&state, &headers)?;
    let appointment_id = parse_appointment_id(&id)?;

    load_for_party(&state, &identity, &appointment_id)?;

    let messages = state
        .store
        .list_by_appointment(&appointment_id)
        .map_err(|e| {
            tracing::error!("List messages error: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        })?;

    Ok(Json(ListMessagesRes {
        messages: messages
            .into_iter()
            .map(|m| ChatMessageRes {
                sequence: m.sequence,
                sender_id: m.sender_id.to_string(),
                message: m.message,
                timestamp: m.created_at.to_rfc3339(),
            })
            .collect(),
    }))
}

/// Loads an appointment the caller is a party to. Missing and not-yours both
/// answer 404 so the API cannot be used to probe for appointment ids.
fn load_for_party(
    state: &AppState,
    identity: &Identity,
    appointment_id: &AppointmentId,
) -> Result<Appointment, RestError> {
    match state.appointments.load(appointment_id) {
        Ok(appointment) if state.guard.can_access(identity, &appointment) => Ok(appointment),
        Ok(_) | Err(PortalError::NotFound) => {
            Err((StatusCode::NOT_FOUND, "appointment not found"))
        }
        Err(e) => {
            tracing::error!("Load appointment error: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
    }
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct WsQuery {
    identity: String,
}

/// Upgrades a connection to the realtime consultation channel.
///
/// The identity is supplied by the surrounding session layer; connections
/// that do not resolve to a known identity are refused before the upgrade.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(identity) = state
        .directory
        .lookup(&IdentityId::from(query.identity.as_str()))
    else {
        return (StatusCode::UNAUTHORIZED, "unknown identity").into_response();
    };

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, identity))
}

/// Drives one WebSocket connection: a writer task drains the session outbox
/// while this task feeds inbound frames to the gateway. Whatever way the
/// connection ends, the session is disconnected from every joined room.
async fn handle_socket(socket: WebSocket, gateway: Gateway, identity: Identity) {
    let (session, mut outbox) = gateway.broker().open_session(identity);
    tracing::info!(session = %session.id(), identity = %session.identity().id, "realtime session opened");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to serialise server event: {}", e),
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => gateway.handle_text(&session, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    gateway.disconnect(&session).await;
    writer.abort();
    tracing::info!(session = %session.id(), "realtime session closed");
}
