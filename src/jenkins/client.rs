use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::debug;

use super::JobClient;
use super::error::JobClientError;
use super::types::{BuildHandle, BuildInfo, BuildStatus, QueueItem, RemoteState};
use crate::context::{Credentials, FlowContext};
use crate::state_machine::{BuildResult, Params};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`JobClient`] for the Jenkins REST API.
pub struct JenkinsClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl JenkinsClient {
    pub fn new(base_url: String, credentials: Option<Credentials>) -> Self {
        Self::with_timeout(base_url, credentials, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: String,
        credentials: Option<Credentials>,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Client for the endpoint and credentials configured in `ctx`.
    pub fn from_context(ctx: &FlowContext) -> Self {
        Self::with_timeout(
            ctx.endpoint.request_url().to_string(),
            ctx.credentials.clone(),
            ctx.request_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(c) => req.basic_auth(&c.username, Some(&c.password)),
            None => req,
        }
    }

    fn job_url(&self, job_name: &str) -> String {
        format!("{}/{}", self.base_url, job_path(job_name))
    }

    async fn fetch_queue_item(&self, ticket: u64) -> Result<QueueItem, JobClientError> {
        let url = format!("{}/queue/item/{ticket}/api/json", self.base_url);
        let response = check(self.authed(self.client.get(&url)).send().await?).await?;
        Ok(response.json::<QueueItem>().await?)
    }

    async fn fetch_build(&self, job_name: &str, number: u64) -> Result<BuildInfo, JobClientError> {
        let url = format!("{}/{number}/api/json", self.job_url(job_name));
        let response = check(self.authed(self.client.get(&url)).send().await?).await?;
        Ok(response.json::<BuildInfo>().await?)
    }
}

#[async_trait]
impl JobClient for JenkinsClient {
    async fn start(
        &self,
        job_name: &str,
        prefix: &str,
        params: &Params,
    ) -> Result<BuildHandle, JobClientError> {
        let full_name = format!("{prefix}{job_name}");
        let request = if params.is_empty() {
            self.client.post(format!("{}/build", self.job_url(&full_name)))
        } else {
            let form: Vec<(&str, String)> = params
                .iter()
                .map(|(k, v)| (k.as_str(), v.to_string()))
                .collect();
            self.client
                .post(format!("{}/buildWithParameters", self.job_url(&full_name)))
                .form(&form)
        };

        let response = check(self.authed(request).send().await?).await?;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| JobClientError::Protocol("start response has no Location".into()))?;
        let ticket = parse_queue_id(location).ok_or_else(|| {
            JobClientError::Protocol(format!("cannot read queue item from {location}"))
        })?;

        debug!(job = %full_name, ticket, "queued");
        Ok(BuildHandle::new(full_name, ticket))
    }

    async fn poll(&self, handle: &BuildHandle) -> Result<BuildStatus, JobClientError> {
        let number = match handle.build_id {
            Some(n) => n,
            None => {
                let item = self.fetch_queue_item(handle.ticket).await?;
                if item.cancelled {
                    return Ok(BuildStatus {
                        state: RemoteState::Finished,
                        result: Some(BuildResult::Aborted),
                        build_id: None,
                    });
                }
                match item.executable {
                    Some(exe) => exe.number,
                    None => return Ok(BuildStatus::pending()),
                }
            }
        };

        let info = self.fetch_build(&handle.job_name, number).await?;
        match info.result {
            Some(result) if !info.building => {
                let result = result
                    .parse::<BuildResult>()
                    .map_err(|e| JobClientError::Protocol(e.to_string()))?;
                Ok(BuildStatus::finished(info.number, result))
            }
            _ => Ok(BuildStatus::running(info.number)),
        }
    }

    async fn stop(&self, handle: &BuildHandle) -> Result<(), JobClientError> {
        let url = match handle.build_id {
            Some(n) => format!("{}/{n}/stop", self.job_url(&handle.job_name)),
            None => format!("{}/queue/cancelItem?id={}", self.base_url, handle.ticket),
        };
        check(self.authed(self.client.post(&url)).send().await?).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, JobClientError> {
    let status = response.status();
    if status.is_success() || status == StatusCode::FOUND {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(JobClientError::from_status(status.as_u16(), message))
}

/// `folder/name` becomes `job/folder/job/name`.
fn job_path(job_name: &str) -> String {
    job_name
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| format!("job/{s}"))
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_queue_id(location: &str) -> Option<u64> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> JenkinsClient {
        JenkinsClient::new(server.uri(), None)
    }

    #[test]
    fn job_path_handles_folders() {
        assert_eq!(job_path("deploy"), "job/deploy");
        assert_eq!(job_path("team/deploy"), "job/team/job/deploy");
    }

    #[test]
    fn queue_id_from_location() {
        assert_eq!(parse_queue_id("http://ci/queue/item/42/"), Some(42));
        assert_eq!(parse_queue_id("http://ci/queue/item/7"), Some(7));
        assert_eq!(parse_queue_id("http://ci/queue/item/"), None);
    }

    #[test]
    fn base_url_is_trimmed() {
        let client = JenkinsClient::new("http://ci:8080/".into(), None);
        assert_eq!(client.base_url(), "http://ci:8080");
    }

    #[tokio::test]
    async fn start_without_params_posts_build() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job/pre_j1/build"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", format!("{}/queue/item/17/", server.uri())),
            )
            .expect(1)
            .mount(&server)
            .await;

        let handle = client_for(&server)
            .start("j1", "pre_", &Params::new())
            .await
            .unwrap();
        assert_eq!(handle.job_name, "pre_j1");
        assert_eq!(handle.ticket, 17);
        assert_eq!(handle.build_id, None);
    }

    #[tokio::test]
    async fn start_with_params_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job/quick/buildWithParameters"))
            .and(body_string_contains("s1=HELLO"))
            .respond_with(
                ResponseTemplate::new(201).insert_header("Location", "http://ci/queue/item/3/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut params = Params::new();
        params.insert("s1".into(), "HELLO".into());
        let handle = client_for(&server).start("quick", "", &params).await.unwrap();
        assert_eq!(handle.ticket, 3);
    }

    #[tokio::test]
    async fn start_sends_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job/j1/build"))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(201).insert_header("Location", "http://ci/queue/item/1/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = JenkinsClient::new(
            server.uri(),
            Some(Credentials {
                username: "flow".into(),
                password: "secret".into(),
            }),
        );
        client.start("j1", "", &Params::new()).await.unwrap();
    }

    #[tokio::test]
    async fn start_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .start("j1", "", &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobClientError::Unauthorized { status: 401, .. }));
    }

    #[tokio::test]
    async fn start_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .start("j1", "", &Params::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn start_missing_location_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .start("j1", "", &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn poll_queued_item_is_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue/item/5/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 5, "why": "Waiting for next available executor"
            })))
            .mount(&server)
            .await;

        let status = client_for(&server)
            .poll(&BuildHandle::new("j1", 5))
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::pending());
    }

    #[tokio::test]
    async fn poll_follows_queue_item_to_build() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue/item/5/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "executable": {"number": 12}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/job/j1/12/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "number": 12, "building": false, "result": "UNSTABLE"
            })))
            .mount(&server)
            .await;

        let status = client_for(&server)
            .poll(&BuildHandle::new("j1", 5))
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::finished(12, BuildResult::Unstable));
    }

    #[tokio::test]
    async fn poll_known_build_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/j1/4/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "number": 4, "building": true, "result": null
            })))
            .mount(&server)
            .await;

        let mut handle = BuildHandle::new("j1", 1);
        handle.build_id = Some(4);
        let status = client_for(&server).poll(&handle).await.unwrap();
        assert_eq!(status, BuildStatus::running(4));
    }

    #[tokio::test]
    async fn poll_cancelled_queue_item_is_aborted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue/item/9/api/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"cancelled": true})),
            )
            .mount(&server)
            .await;

        let status = client_for(&server)
            .poll(&BuildHandle::new("j1", 9))
            .await
            .unwrap();
        assert_eq!(status.state, RemoteState::Finished);
        assert_eq!(status.result, Some(BuildResult::Aborted));
    }

    #[tokio::test]
    async fn stop_posts_to_build() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job/j1/4/stop"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut handle = BuildHandle::new("j1", 1);
        handle.build_id = Some(4);
        client_for(&server).stop(&handle).await.unwrap();
    }
}
