use crate::connection::NO_BACKEND_MESSAGE;
use crate::errors::RelayError;
use crate::fanout::fan_out;
use crate::hub::RelayHub;
use crate::metrics_defs::ADMIN_FANOUT_FAILURES;
use fleet::health::BackendStatus;
use http::Method;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use shared::counter;
use shared::http::{ResponseBody, full_body, make_error_response, make_json_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Health, readiness and fleet administration endpoints.
pub struct AdminService {
    hub: Arc<RelayHub>,
}

impl AdminService {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self { hub }
    }
}

impl Service<Request<Incoming>> for AdminService {
    type Response = Response<ResponseBody>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let hub = self.hub.clone();

        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let res = match (&method, path.as_str()) {
                (&Method::GET, "/health") => Response::new(full_body("ok\n")),
                (&Method::GET, "/ready") => match hub.fleet().is_ready() {
                    true => Response::new(full_body("ok\n")),
                    false => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
                },
                (&Method::GET, "/servers") => list_servers(&hub),
                (&Method::GET, "/bots") => list_bots(&hub).await,
                (&Method::GET, "/users-info") => users_info(&hub).await,
                (&Method::DELETE, _) if path.starts_with("/user/") => {
                    let auth_id = urlencoding::decode(&path["/user/".len()..])
                        .map(|id| id.into_owned())
                        .unwrap_or_default();
                    delete_user(&hub, auth_id).await
                }
                _ => make_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerView {
    id: String,
    url: String,
    name: String,
    max_capacity: u32,
    healthy: bool,
    api_healthy: bool,
    heartbeat_healthy: bool,
    load: f64,
    user_count: u64,
    /// Milliseconds since the epoch
    last_seen: Option<u64>,
}

impl From<BackendStatus> for ServerView {
    fn from(status: BackendStatus) -> Self {
        ServerView {
            id: status.backend.id,
            url: status.backend.url.to_string(),
            name: status.backend.name,
            max_capacity: status.backend.max_capacity,
            healthy: status.combined_healthy,
            api_healthy: status.api_healthy,
            heartbeat_healthy: status.heartbeat_healthy,
            load: status.load_units,
            user_count: status.occupant_count,
            last_seen: status
                .last_seen
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
        }
    }
}

fn list_servers(hub: &RelayHub) -> Response<ResponseBody> {
    let servers: Vec<ServerView> = hub
        .fleet()
        .health()
        .snapshot()
        .into_iter()
        .map(ServerView::from)
        .collect();

    make_json_response(StatusCode::OK, &json!({ "success": true, "servers": servers }))
}

async fn list_bots(hub: &RelayHub) -> Response<ResponseBody> {
    let fleet = hub.fleet();
    let results = fan_out(fleet.registry(), fleet.client(), |client, backend| async move {
        client.list_bots(&backend).await
    })
    .await;

    let mut bots = Vec::new();
    for (backend, result) in results {
        match result {
            Ok(backend_bots) => {
                bots.extend(backend_bots.into_iter().map(|mut bot| {
                    if let Value::Object(fields) = &mut bot {
                        fields.insert("server_id".into(), Value::String(backend.id.clone()));
                        fields.insert("server_name".into(), Value::String(backend.name.clone()));
                    }
                    bot
                }));
            }
            Err(e) => {
                tracing::warn!(backend_id = %backend.id, error = %e, "failed to list bots");
                counter!(ADMIN_FANOUT_FAILURES, "op" => "bots").increment(1);
            }
        }
    }

    make_json_response(StatusCode::OK, &json!({ "success": true, "bots": bots }))
}

/// Served by any live backend; there is no session to route on.
async fn users_info(hub: &RelayHub) -> Response<ResponseBody> {
    let fleet = hub.fleet();
    let Some(backend) = fleet.router().assign("admin", None).await else {
        return make_json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({ "success": false, "message": NO_BACKEND_MESSAGE }),
        );
    };

    match fleet.client().users_info(&backend).await {
        Ok(body) => make_json_response(StatusCode::OK, &body),
        Err(e) => {
            tracing::warn!(backend_id = %backend.id, error = %e, "failed to fetch users info");
            counter!(ADMIN_FANOUT_FAILURES, "op" => "users_info").increment(1);
            make_json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "success": false, "message": e.to_string() }),
            )
        }
    }
}

#[derive(Serialize)]
struct StoreOutcome {
    success: bool,
    errors: Vec<String>,
}

#[derive(Serialize)]
struct BackendOutcome {
    server: String,
    success: bool,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteUserResponse {
    store: StoreOutcome,
    bot_servers: Vec<BackendOutcome>,
    purged_rooms: usize,
    success: bool,
}

async fn delete_user(hub: &RelayHub, auth_id: String) -> Response<ResponseBody> {
    if auth_id.is_empty() {
        return make_json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "success": false, "message": "authId is required." }),
        );
    }

    let fleet = hub.fleet();
    let store = match fleet.store().delete_identity(&auth_id).await {
        Ok(()) => StoreOutcome {
            success: true,
            errors: Vec::new(),
        },
        Err(e) => {
            tracing::error!(auth_id, error = %e, "failed to delete sessions from the store");
            StoreOutcome {
                success: false,
                errors: vec![e.to_string()],
            }
        }
    };

    let id = auth_id.clone();
    let results = fan_out(fleet.registry(), fleet.client(), move |client, backend| {
        let id = id.clone();
        async move { client.delete_user(&backend, &id).await }
    })
    .await;

    let bot_servers: Vec<BackendOutcome> = results
        .into_iter()
        .map(|(backend, result)| match result {
            Ok(message) => BackendOutcome {
                server: backend.name,
                success: true,
                message,
            },
            Err(e) => {
                tracing::warn!(auth_id, backend_id = %backend.id, error = %e, "backend user delete failed");
                counter!(ADMIN_FANOUT_FAILURES, "op" => "delete_user").increment(1);
                BackendOutcome {
                    server: backend.name,
                    success: false,
                    message: e.to_string(),
                }
            }
        })
        .collect();

    let purged_rooms = hub.cache().purge_identity(&auth_id);
    let success = store.success && bot_servers.iter().any(|outcome| outcome.success);
    tracing::info!(auth_id, success, purged_rooms, "deleted user");

    make_json_response(
        StatusCode::OK,
        &DeleteUserResponse {
            store,
            bot_servers,
            purged_rooms,
            success,
        },
    )
}
