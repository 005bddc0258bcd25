//! HTTP control plane.
//!
//! Talks to the service's REST API with Basic authentication (`mid:psk`).
//! Any status other than 200 is a [`TransportError::Http`].
//!
//! Besides the [`ControlPlane`] operations it covers device events, the
//! offline command queue, firmware downloads and dev-sync. Firmware blobs
//! are returned as downloaded; checksums are not verified here.

use super::{ControlEndpoint, ControlPlane};
use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldlink_types::{
    Command, CommandResponse, DeviceConnection, DeviceCredentials, DeviceEvent,
    FirmwarePatchDescriptor, FirmwareReleaseDescriptor, ObservationBatch, SettingsSnapshot,
};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const PING_PATH: &str = "/api/tools/ping";
const SERVER_TIME_PATH: &str = "/api/tools/servertime";

/// Control plane over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
    credentials: DeviceCredentials,
    notify_listeners: bool,
}

impl HttpControlPlane {
    /// Build a client for `endpoint`.
    ///
    /// `timeout` bounds every request. With `accept_invalid_certs` TLS
    /// certificate errors are ignored.
    pub fn new(
        endpoint: &ControlEndpoint,
        credentials: DeviceCredentials,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: endpoint.base_url(),
            credentials,
            notify_listeners: true,
        })
    }

    /// Whether uploads notify service-side listeners (default: true).
    ///
    /// Backlog uploads usually turn this off so old data does not trigger
    /// live alerts.
    pub fn with_notify_listeners(mut self, notify: bool) -> Self {
        self.notify_listeners = notify;
        self
    }

    /// Base address requests go to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn device_path(&self, suffix: &str) -> String {
        format!("/api/devices/{}{}", self.credentials.mid(), suffix)
    }

    fn observations_path(&self) -> String {
        if self.notify_listeners {
            self.device_path("/observations")
        } else {
            self.device_path("/observations/import")
        }
    }

    /// Current time according to the service.
    pub async fn server_time(&self) -> Result<DateTime<Utc>, TransportError> {
        self.get_json(SERVER_TIME_PATH).await
    }

    /// Report a device event.
    pub async fn report_event(&self, event: &DeviceEvent) -> Result<(), TransportError> {
        self.post_json(&self.device_path("/events"), event).await
    }

    /// Commands queued for this device while it was offline.
    pub async fn command_queue(&self) -> Result<Vec<Command>, TransportError> {
        self.get_json(&self.device_path("/commands/queue")).await
    }

    /// Answer a command over HTTP instead of the broker.
    pub async fn respond_to_command(
        &self,
        response: &CommandResponse,
    ) -> Result<(), TransportError> {
        let path = self.device_path(&format!("/commands/{}/response", response.id));
        self.post_json(&path, response).await
    }

    /// Metadata of the firmware release assigned to this device.
    pub async fn firmware_release(&self) -> Result<FirmwareReleaseDescriptor, TransportError> {
        self.get_json(&self.device_path("/firmware/current")).await
    }

    /// Download the blob of a firmware release.
    ///
    /// With `authenticated` the blob streams through the API using the device
    /// credentials; otherwise it is fetched from `descriptor.url` without them.
    pub async fn download_firmware_release(
        &self,
        descriptor: &FirmwareReleaseDescriptor,
        authenticated: bool,
    ) -> Result<Vec<u8>, TransportError> {
        if authenticated {
            let url = format!("{}{}", self.base_url, self.device_path("/firmware/current/data"));
            self.download(&url, true).await
        } else {
            self.download(&descriptor.url, false).await
        }
    }

    /// Metadata of the patch from `from_version` to the current release.
    ///
    /// `None` when the service has no patch, i.e. `from_version` is already the
    /// latest version.
    pub async fn firmware_patch(
        &self,
        from_version: i32,
    ) -> Result<Option<FirmwarePatchDescriptor>, TransportError> {
        let path = self.device_path(&format!("/firmware/patch/{from_version}"));
        match self.get_json(&path).await {
            Ok(patch) => Ok(Some(patch)),
            Err(TransportError::Http { status: 404, .. }) => {
                tracing::debug!("No firmware patch from version {}", from_version);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Download a firmware patch from `descriptor.url`.
    pub async fn download_firmware_patch(
        &self,
        descriptor: &FirmwarePatchDescriptor,
    ) -> Result<Vec<u8>, TransportError> {
        self.download(&descriptor.url, false).await
    }

    /// Exchange a dev-sync request for the service's response.
    pub async fn dev_sync<Req, Resp>(&self, request: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let text = self.post_text(&self.device_path("/devsync"), request).await?;
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn get_text(&self, path: &str) -> Result<String, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .basic_auth(self.credentials.mid(), Some(self.credentials.pre_shared_key()))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(request_error)?;

        read_ok_body(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let text = self.get_text(path).await?;
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn download(&self, url: &str, authenticated: bool) -> Result<Vec<u8>, TransportError> {
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url);
        if authenticated {
            request =
                request.basic_auth(self.credentials.mid(), Some(self.credentials.pre_shared_key()));
        }
        let response = ok_status(request.send().await.map_err(request_error)?)?;
        let blob = response.bytes().await.map_err(request_error)?;
        tracing::debug!("Downloaded {} bytes", blob.len());
        Ok(blob.to_vec())
    }

    async fn post_text<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(self.credentials.mid(), Some(self.credentials.pre_shared_key()))
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(request_error)?;

        read_ok_body(response).await
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(), TransportError> {
        self.post_text(path, body).await.map(|_| ())
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::ConnectionFailed(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

fn ok_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(TransportError::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        });
    }
    Ok(response)
}

async fn read_ok_body(response: reqwest::Response) -> Result<String, TransportError> {
    ok_status(response)?.text().await.map_err(request_error)
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn ping(&self) -> bool {
        match self.get_text(PING_PATH).await {
            Ok(body) => body.contains("PONG"),
            Err(e) => {
                tracing::debug!("Ping failed: {}", e);
                false
            }
        }
    }

    async fn connection_descriptor(&self) -> Result<DeviceConnection, TransportError> {
        self.get_json(&self.device_path("/connect")).await
    }

    async fn fetch_settings(&self) -> Result<SettingsSnapshot, TransportError> {
        self.get_json(&self.device_path("/settings/expanded")).await
    }

    async fn post_observations(&self, batch: &ObservationBatch) -> Result<(), TransportError> {
        self.post_json(&self.observations_path(), batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as Status};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use fieldlink_types::{BrokerNode, EventCategory, Observation, ObservationValue};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const AUTH: &str = "Basic REVWMDAxOnNlY3JldA==";
    const RELEASE_BLOB: &[u8] = &[0xf1, 0x00, 0x07];
    const PATCH_BLOB: &[u8] = &[0x0d, 0x06, 0x07];

    type Seen = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(AUTH)
    }

    async fn record(
        State(seen): State<Seen>,
        headers: HeaderMap,
        uri: axum::http::Uri,
        Json(body): Json<serde_json::Value>,
    ) -> Status {
        if !authorized(&headers) {
            return Status::UNAUTHORIZED;
        }
        seen.lock().unwrap().push((uri.path().to_string(), body));
        Status::OK
    }

    async fn command_queue(headers: HeaderMap) -> Result<Json<serde_json::Value>, Status> {
        if !authorized(&headers) {
            return Err(Status::UNAUTHORIZED);
        }
        Ok(Json(json!([
            {"Id": 7, "Timestamp": "2024-05-01T12:00:00Z", "Arguments": [{"Id": 1, "Value": "on"}]},
            {"Id": 9, "Timestamp": "2024-05-01T12:05:00Z", "ExpiresAt": "2024-05-02T12:05:00Z"}
        ])))
    }

    async fn dev_sync(
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Result<Json<serde_json::Value>, Status> {
        if !authorized(&headers) {
            return Err(Status::UNAUTHORIZED);
        }
        Ok(Json(json!({"Accepted": true, "Request": body})))
    }

    async fn release_data(headers: HeaderMap) -> Result<Vec<u8>, Status> {
        if !authorized(&headers) {
            return Err(Status::UNAUTHORIZED);
        }
        Ok(RELEASE_BLOB.to_vec())
    }

    // Public blob hosting never sees the device key
    async fn public_blob(headers: HeaderMap, uri: axum::http::Uri) -> Result<Vec<u8>, Status> {
        if headers.contains_key("authorization") {
            return Err(Status::BAD_REQUEST);
        }
        match uri.path() {
            "/fw/7.bin" => Ok(RELEASE_BLOB.to_vec()),
            "/fw/6-7.patch" => Ok(PATCH_BLOB.to_vec()),
            _ => Err(Status::NOT_FOUND),
        }
    }

    async fn serve(seen: Seen) -> ControlEndpoint {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let base = format!("http://127.0.0.1:{port}");

        let release = FirmwareReleaseDescriptor {
            id: 12,
            version_no: 7,
            release_date: None,
            size: RELEASE_BLOB.len() as i64,
            firmware_md5: "unused".into(),
            url: format!("{base}/fw/7.bin"),
        };
        let patch = FirmwarePatchDescriptor {
            from_version_no: 6,
            to_version_no: 7,
            size: PATCH_BLOB.len() as i64,
            patch_md5: "unused".into(),
            url: format!("{base}/fw/6-7.patch"),
        };

        let router = Router::new()
            .route("/api/tools/ping", get(|| async { "\"PONG\"" }))
            .route(
                "/api/tools/servertime",
                get(|| async { "\"2024-05-01T12:00:00Z\"" }),
            )
            .route(
                "/api/devices/DEV001/connect",
                get(|| async {
                    Json(DeviceConnection {
                        node: Some(BrokerNode {
                            host: "mq.example.net".into(),
                            encrypted_port: 5671,
                            unencrypted_port: 5672,
                        }),
                        backoff_seconds: Some(90),
                    })
                }),
            )
            .route(
                "/api/devices/DEV001/settings/expanded",
                get(|| async { Status::UNAUTHORIZED }),
            )
            .route("/api/devices/DEV001/observations", post(record))
            .route("/api/devices/DEV001/observations/import", post(record))
            .route("/api/devices/DEV001/events", post(record))
            .route("/api/devices/DEV001/commands/queue", get(command_queue))
            .route("/api/devices/DEV001/commands/7/response", post(record))
            .route("/api/devices/DEV001/devsync", post(dev_sync))
            .route(
                "/api/devices/DEV001/firmware/current",
                get(move || async move { Json(release) }),
            )
            .route("/api/devices/DEV001/firmware/current/data", get(release_data))
            .route(
                "/api/devices/DEV001/firmware/patch/6",
                get(move || async move { Json(patch) }),
            )
            .route(
                "/api/devices/DEV001/firmware/patch/99",
                get(|| async { Status::INTERNAL_SERVER_ERROR }),
            )
            .route("/fw/7.bin", get(public_blob))
            .route("/fw/6-7.patch", get(public_blob))
            .with_state(seen);

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        ControlEndpoint {
            host: "127.0.0.1".into(),
            use_https: false,
            port: Some(port),
        }
    }

    fn client(endpoint: &ControlEndpoint) -> HttpControlPlane {
        client_with_key(endpoint, "secret")
    }

    fn client_with_key(endpoint: &ControlEndpoint, key: &str) -> HttpControlPlane {
        HttpControlPlane::new(
            endpoint,
            DeviceCredentials::new("DEV001", key),
            Duration::from_secs(5),
            false,
        )
        .unwrap()
    }

    fn command_7() -> Command {
        Command {
            id: 7,
            timestamp: "2024-05-01T12:00:00Z".parse().unwrap(),
            expires_at: None,
            arguments: vec![],
        }
    }

    // ===========================================
    // Reachability
    // ===========================================

    #[tokio::test]
    async fn ping_expects_pong() {
        let endpoint = serve(Seen::default()).await;
        assert!(client(&endpoint).ping().await);
    }

    #[tokio::test]
    async fn ping_to_closed_port_is_false() {
        let endpoint = ControlEndpoint {
            host: "127.0.0.1".into(),
            use_https: false,
            port: Some(1),
        };
        assert!(!client(&endpoint).ping().await);
    }

    #[tokio::test]
    async fn server_time_parses() {
        let endpoint = serve(Seen::default()).await;
        let time = client(&endpoint).server_time().await.unwrap();
        assert_eq!(time.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    // ===========================================
    // Requests
    // ===========================================

    #[tokio::test]
    async fn fetches_connection_descriptor() {
        let endpoint = serve(Seen::default()).await;
        let descriptor = client(&endpoint).connection_descriptor().await.unwrap();

        assert_eq!(descriptor.node.unwrap().host, "mq.example.net");
        assert_eq!(descriptor.backoff_seconds, Some(90));
    }

    #[tokio::test]
    async fn non_ok_status_is_http_error() {
        let endpoint = serve(Seen::default()).await;
        let result = client(&endpoint).fetch_settings().await;

        assert!(matches!(
            result,
            Err(TransportError::Http { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn posts_observations_with_basic_auth() {
        let seen = Seen::default();
        let endpoint = serve(seen.clone()).await;
        let batch = ObservationBatch::single(3, Observation::now(ObservationValue::Double(2.5)));

        client(&endpoint).post_observations(&batch).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "/api/devices/DEV001/observations");
        assert_eq!(seen[0].1[0]["ObservationId"], 3);
        assert_eq!(seen[0].1[0]["Observations"][0]["Value"], 2.5);
    }

    #[tokio::test]
    async fn backlog_uploads_use_import_path() {
        let seen = Seen::default();
        let endpoint = serve(seen.clone()).await;
        let batch = ObservationBatch::single(3, Observation::now(ObservationValue::Integer(1)));

        client(&endpoint)
            .with_notify_listeners(false)
            .post_observations(&batch)
            .await
            .unwrap();

        assert_eq!(
            seen.lock().unwrap()[0].0,
            "/api/devices/DEV001/observations/import"
        );
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let endpoint = serve(Seen::default()).await;
        let plane = client_with_key(&endpoint, "wrong");
        let batch = ObservationBatch::single(1, Observation::now(ObservationValue::Integer(1)));

        assert!(matches!(
            plane.post_observations(&batch).await,
            Err(TransportError::Http { status: 401, .. })
        ));
    }

    // ===========================================
    // Events and commands
    // ===========================================

    #[tokio::test]
    async fn reports_event_in_service_shape() {
        let seen = Seen::default();
        let endpoint = serve(seen.clone()).await;
        let event = DeviceEvent {
            timestamp: "2024-05-01T12:00:00Z".parse().unwrap(),
            category: EventCategory::Warning,
            title: "Low battery".into(),
            body: "3.1 V".into(),
        };

        client(&endpoint).report_event(&event).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "/api/devices/DEV001/events");
        assert_eq!(seen[0].1["Category"], 2);
        assert_eq!(seen[0].1["Title"], "Low battery");
        assert_eq!(seen[0].1["Body"], "3.1 V");
        assert_eq!(seen[0].1["Timestamp"], "2024-05-01T12:00:00Z");
    }

    #[tokio::test]
    async fn rejected_event_is_http_error() {
        let seen = Seen::default();
        let endpoint = serve(seen.clone()).await;
        let event = DeviceEvent {
            timestamp: Utc::now(),
            category: EventCategory::Information,
            title: "Boot".into(),
            body: String::new(),
        };

        let result = client_with_key(&endpoint, "wrong").report_event(&event).await;

        assert!(matches!(result, Err(TransportError::Http { status: 401, .. })));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_queue_parses_pending_commands() {
        let endpoint = serve(Seen::default()).await;

        let commands = client(&endpoint).command_queue().await.unwrap();

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].id, 7);
        assert_eq!(commands[0].argument(1), Some("on"));
        assert!(commands[1].arguments.is_empty());
        assert!(commands[1].expires_at.is_some());
    }

    #[tokio::test]
    async fn command_queue_requires_credentials() {
        let endpoint = serve(Seen::default()).await;
        assert!(matches!(
            client_with_key(&endpoint, "wrong").command_queue().await,
            Err(TransportError::Http { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn responds_to_command_by_id() {
        let seen = Seen::default();
        let endpoint = serve(seen.clone()).await;
        let response = CommandResponse::accepted(&command_7()).with_result_code(3);

        client(&endpoint).respond_to_command(&response).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "/api/devices/DEV001/commands/7/response");
        assert_eq!(seen[0].1["Id"], 7);
        assert_eq!(seen[0].1["WasAccepted"], true);
        assert_eq!(seen[0].1["ResultCode"], 3);
        assert!(seen[0].1.get("Comment").is_none());
    }

    #[tokio::test]
    async fn response_to_unknown_command_is_http_error() {
        let endpoint = serve(Seen::default()).await;
        let mut response = CommandResponse::rejected(&command_7());
        response.id = 8;

        assert!(matches!(
            client(&endpoint).respond_to_command(&response).await,
            Err(TransportError::Http { status: 404, .. })
        ));
    }

    // ===========================================
    // Firmware and dev-sync
    // ===========================================

    #[tokio::test]
    async fn firmware_release_downloads_with_and_without_credentials() {
        let endpoint = serve(Seen::default()).await;
        let plane = client(&endpoint);

        let release = plane.firmware_release().await.unwrap();
        assert_eq!(release.version_no, 7);
        assert!(release.url.ends_with("/fw/7.bin"));

        let through_api = plane.download_firmware_release(&release, true).await.unwrap();
        let direct = plane.download_firmware_release(&release, false).await.unwrap();
        assert_eq!(through_api, RELEASE_BLOB);
        assert_eq!(direct, RELEASE_BLOB);
    }

    #[tokio::test]
    async fn authenticated_firmware_download_needs_valid_key() {
        let endpoint = serve(Seen::default()).await;
        let release = client(&endpoint).firmware_release().await.unwrap();

        let result = client_with_key(&endpoint, "wrong")
            .download_firmware_release(&release, true)
            .await;

        assert!(matches!(result, Err(TransportError::Http { status: 401, .. })));
    }

    #[tokio::test]
    async fn firmware_patch_downloads() {
        let endpoint = serve(Seen::default()).await;
        let plane = client(&endpoint);

        let patch = plane.firmware_patch(6).await.unwrap().unwrap();
        assert_eq!(patch.to_version_no, 7);
        assert_eq!(plane.download_firmware_patch(&patch).await.unwrap(), PATCH_BLOB);
    }

    #[tokio::test]
    async fn missing_firmware_patch_is_none() {
        let endpoint = serve(Seen::default()).await;
        let plane = client(&endpoint);

        assert_eq!(plane.firmware_patch(7).await.unwrap(), None);
        assert!(matches!(
            plane.firmware_patch(99).await,
            Err(TransportError::Http { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn dev_sync_returns_service_response() {
        let endpoint = serve(Seen::default()).await;

        let response: serde_json::Value = client(&endpoint)
            .dev_sync(&json!({"Files": [{"Name": "app.cfg", "Size": 12}]}))
            .await
            .unwrap();

        assert_eq!(response["Accepted"], true);
        assert_eq!(response["Request"]["Files"][0]["Name"], "app.cfg");
    }

    #[tokio::test]
    async fn dev_sync_with_unparsable_response_is_decode_error() {
        let endpoint = serve(Seen::default()).await;

        let result: Result<Vec<i32>, _> = client(&endpoint).dev_sync(&json!({})).await;

        assert!(matches!(result, Err(TransportError::Decode(_))));
    }
}
