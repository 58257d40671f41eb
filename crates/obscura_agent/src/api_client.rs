//! HTTP client for the Obscura server.
//!
//! Maps every failure onto the agent error taxonomy: transport problems
//! become `Connection` (recoverable by the polling loop), 401 becomes
//! `Authentication`, a 403 carrying the `agent_revoked` code becomes
//! `Revoked`, and everything else surfaces as `Api`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use obscura_protocol::{
    defaults, AgentCollectionsResponse, AgentError, AgentResult, CameraDiscoverRequest,
    CameraDiscoverResponse, ChunkAppendRequest, ChunkCommitRequest, ChunkStartRequest,
    ChunkStartResponse, ClaimResponse, CompleteRequest, CompleteResponse, ErrorBody, Guid,
    HeartbeatRequest, HeartbeatResponse, InputStateRequest, InputStateResponse, JobConfig,
    OfflineUploadRequest, ProgressUpdate, RegisterRequest, RegisterResponse, TeamConfigResponse,
    ERROR_CODE_AGENT_REVOKED,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Chunk size for large uploads (256 KiB raw per append).
const UPLOAD_CHUNK_BYTES: usize = 256 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

impl ApiClient {
    pub fn new(server_url: &str, api_key: &str) -> AgentResult<Self> {
        let base = Url::parse(server_url)
            .map_err(|err| AgentError::Connection(format!("invalid server url: {err}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AgentError::Connection(err.to_string()))?;
        Ok(Self {
            http,
            base,
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> AgentResult<Url> {
        self.base
            .join(path)
            .map_err(|err| AgentError::Connection(format!("invalid endpoint {path}: {err}")))
    }

    /// One-shot registration; no API key yet, the token authenticates.
    pub async fn register(server_url: &str, req: &RegisterRequest) -> AgentResult<RegisterResponse> {
        let client = Self::new(server_url, "")?;
        let url = client.endpoint("agents/register")?;
        let response = client
            .http
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(transport_error)?;
        parse_json(response).await
    }

    /// Claim one job. `None` on 204 (queue empty for this agent).
    pub async fn claim_job(&self) -> AgentResult<Option<ClaimResponse>> {
        let response = self.post_raw("jobs/claim", &()).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(parse_json(response).await?))
    }

    pub async fn heartbeat(
        &self,
        agent_guid: Guid,
        req: &HeartbeatRequest,
    ) -> AgentResult<HeartbeatResponse> {
        self.post_json(&format!("agents/{agent_guid}/heartbeat"), req)
            .await
    }

    pub async fn job_config(&self, job_guid: Guid) -> AgentResult<JobConfig> {
        self.get_json(&format!("jobs/{job_guid}/config")).await
    }

    pub async fn report_progress(&self, job_guid: Guid, update: &ProgressUpdate) -> AgentResult<()> {
        let response = self
            .post_raw(&format!("jobs/{job_guid}/progress"), update)
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn check_input_state(
        &self,
        job_guid: Guid,
        input_state_hash: &str,
    ) -> AgentResult<InputStateResponse> {
        self.post_json(
            &format!("jobs/{job_guid}/input-state"),
            &InputStateRequest {
                input_state_hash: input_state_hash.to_string(),
            },
        )
        .await
    }

    /// Post a completion, switching to the chunked path for large bodies
    /// or any HTML report.
    pub async fn complete_job(
        &self,
        job_guid: Guid,
        req: &CompleteRequest,
    ) -> AgentResult<CompleteResponse> {
        let body = serde_json::to_vec(req)
            .map_err(|err| AgentError::api(0, format!("unserializable completion: {err}")))?;
        if body.len() > defaults::INLINE_UPLOAD_LIMIT_BYTES || req.result.report_html.is_some() {
            return self.upload_chunked(Some(job_guid), &body).await;
        }
        self.post_json(&format!("jobs/{job_guid}/complete"), req).await
    }

    /// Sync one offline result, chunked when large.
    pub async fn upload_offline(&self, req: &OfflineUploadRequest) -> AgentResult<CompleteResponse> {
        let body = serde_json::to_vec(req)
            .map_err(|err| AgentError::api(0, format!("unserializable upload: {err}")))?;
        if body.len() > defaults::INLINE_UPLOAD_LIMIT_BYTES
            || req.result.result.report_html.is_some()
        {
            return self.upload_chunked(None, &body).await;
        }
        self.post_json("results/upload", req).await
    }

    async fn upload_chunked(
        &self,
        job_guid: Option<Guid>,
        body: &[u8],
    ) -> AgentResult<CompleteResponse> {
        let start: ChunkStartResponse = self
            .post_json(
                "chunks/start",
                &ChunkStartRequest {
                    job_guid,
                    total_size: body.len() as u64,
                },
            )
            .await?;

        for (index, chunk) in body.chunks(UPLOAD_CHUNK_BYTES).enumerate() {
            let response = self
                .post_raw(
                    "chunks/append",
                    &ChunkAppendRequest {
                        upload_guid: start.upload_guid,
                        index: index as u64,
                        data_b64: BASE64.encode(chunk),
                    },
                )
                .await?;
            check_status(response).await?;
        }

        debug!(
            "Committing chunked upload {} ({} bytes)",
            start.upload_guid,
            body.len()
        );
        self.post_json(
            "chunks/commit",
            &ChunkCommitRequest {
                upload_guid: start.upload_guid,
            },
        )
        .await
    }

    pub async fn team_config(&self) -> AgentResult<TeamConfigResponse> {
        self.get_json("team/config").await
    }

    pub async fn list_collections(&self, agent_guid: Guid) -> AgentResult<AgentCollectionsResponse> {
        self.get_json(&format!("agents/{agent_guid}/collections"))
            .await
    }

    pub async fn discover_cameras(
        &self,
        camera_ids: Vec<String>,
    ) -> AgentResult<CameraDiscoverResponse> {
        self.post_json("cameras/discover", &CameraDiscoverRequest { camera_ids })
            .await
    }

    /// Download a release binary; returns the bytes and the `X-Checksum`
    /// header value for verification before any swap.
    pub async fn download_release(
        &self,
        version: &str,
        platform: &str,
    ) -> AgentResult<(Vec<u8>, String)> {
        let url = self.endpoint(&format!("releases/{version}/{platform}"))?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        let checksum = response
            .headers()
            .get("x-checksum")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(transport_error)?
            .to_vec();
        Ok((bytes, checksum))
    }

    async fn post_raw<B: Serialize>(&self, path: &str, body: &B) -> AgentResult<Response> {
        let url = self.endpoint(path)?;
        self.http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AgentResult<T> {
        let response = self.post_raw(path, body).await?;
        parse_json(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AgentResult<T> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        parse_json(response).await
    }
}

fn transport_error(err: reqwest::Error) -> AgentError {
    AgentError::Connection(err.to_string())
}

/// Classify a non-success status into the error taxonomy.
async fn check_status(response: Response) -> AgentResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: Option<ErrorBody> = response.json().await.ok();
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| status.to_string());

    if status == StatusCode::UNAUTHORIZED {
        return Err(AgentError::Authentication(message));
    }
    if status == StatusCode::FORBIDDEN
        && body
            .as_ref()
            .and_then(|b| b.code.as_deref())
            .is_some_and(|code| code == ERROR_CODE_AGENT_REVOKED)
    {
        return Err(AgentError::Revoked(message));
    }
    Err(AgentError::api(status.as_u16(), message))
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> AgentResult<T> {
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|err| AgentError::api(0, format!("malformed server response: {err}")))
}
