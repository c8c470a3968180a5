use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::WizardError;
use crate::gemini::GEMINI_BASE_URL;
use crate::media::ImagePayload;

/// Opaque handle to a long-running remote video job. Replaced wholesale on
/// every poll; never inspected beyond `done`, the error and the video URI.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VideoOperation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub response: Option<OperationResponse>,
    #[serde(default)]
    pub error: Option<OperationError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationError {
    pub code: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoRef {
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedVideo {
    pub video: Option<VideoRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVideoResponse {
    #[serde(default)]
    pub generated_samples: Vec<GeneratedVideo>,
}

/// The API has shipped both spellings of the completion payload; accept either.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    #[serde(default)]
    pub generated_videos: Vec<GeneratedVideo>,
    #[serde(default)]
    pub generate_video_response: Option<GenerateVideoResponse>,
}

impl VideoOperation {
    /// Remote locator of the first generated video, once the job is done.
    pub fn first_video_uri(&self) -> Option<&str> {
        let resp = self.response.as_ref()?;
        let direct = resp
            .generated_videos
            .first()
            .and_then(|g| g.video.as_ref())
            .and_then(|v| v.uri.as_deref());
        if direct.is_some() {
            return direct;
        }
        resp.generate_video_response
            .as_ref()?
            .generated_samples
            .first()
            .and_then(|g| g.video.as_ref())
            .and_then(|v| v.uri.as_deref())
    }
}

/// Seam for the polling loop: production code talks to Veo, tests inject mocks.
#[async_trait]
pub trait VideoOperations: Send + Sync {
    /// Start the remote job. The returned operation may already be done.
    async fn submit(
        &self,
        payload: &ImagePayload,
        prompt: &str,
    ) -> Result<VideoOperation, WizardError>;

    /// Re-fetch job status; the fresh operation replaces the old one.
    async fn poll(&self, op: &VideoOperation) -> Result<VideoOperation, WizardError>;

    /// Download the finished video content.
    async fn fetch_video(&self, uri: &str) -> Result<Vec<u8>, WizardError>;
}

/// Drives the whole generation protocol: submit, poll until done, download.
/// A failure at any step aborts the operation with no partial retry; the
/// caller lets the user resubmit from the prompt-review step.
///
/// The loop has no iteration bound: it runs until the remote job reports
/// completion or a call errors. The interval comes from settings (10 s by
/// default).
pub async fn run_generation(
    ops: &dyn VideoOperations,
    payload: &ImagePayload,
    prompt: &str,
    poll_interval: Duration,
    mut on_progress: impl FnMut(&str) + Send,
) -> Result<Vec<u8>, WizardError> {
    on_progress("Preparing image for video generation...");
    let mut operation = ops.submit(payload, prompt).await?;
    info!(operation = %operation.name, "video generation submitted");
    on_progress("Starting walkthrough video generation...");

    let mut poll_count: u64 = 0;
    while !operation.done {
        poll_count += 1;
        let elapsed = poll_count * poll_interval.as_secs();
        on_progress(&format!(
            "Generating video... ({elapsed}s elapsed). This may take a few minutes."
        ));
        tokio::time::sleep(poll_interval).await;
        operation = ops.poll(&operation).await?;
        debug!(polls = poll_count, done = operation.done, "polled video operation");
    }

    if let Some(err) = operation.error {
        let msg = err
            .message
            .unwrap_or_else(|| format!("operation failed with code {:?}", err.code));
        return Err(WizardError::Generation(msg));
    }

    let uri = operation
        .first_video_uri()
        .ok_or_else(|| {
            WizardError::Generation("no video in completed operation".to_string())
        })?
        .to_string();

    on_progress("Video generated! Preparing download...");
    let bytes = ops.fetch_video(&uri).await?;
    info!(bytes = bytes.len(), "video content downloaded");
    on_progress("Video ready!");
    Ok(bytes)
}

pub struct VeoClient {
    api_key: String,
    model: String,
}

impl VeoClient {
    pub fn new(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl VideoOperations for VeoClient {
    async fn submit(
        &self,
        payload: &ImagePayload,
        prompt: &str,
    ) -> Result<VideoOperation, WizardError> {
        let url = format!(
            "{}/models/{}:predictLongRunning",
            GEMINI_BASE_URL, self.model
        );
        let body = serde_json::json!({
            "instances": [
                {
                    "prompt": prompt,
                    "image": {
                        "bytesBase64Encoded": payload.data,
                        "mimeType": payload.mime_type,
                    }
                }
            ],
            "parameters": {
                "aspectRatio": "16:9",
                "sampleCount": 1,
            }
        });

        let client = reqwest::Client::new();
        let resp = client
            .post(url)
            .header("X-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| WizardError::Generation(format!("veo submit failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(WizardError::Generation(format!(
                "veo submit error: HTTP {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| WizardError::Generation(format!("veo submit parse error: {e}")))
    }

    async fn poll(&self, op: &VideoOperation) -> Result<VideoOperation, WizardError> {
        let url = format!("{}/{}", GEMINI_BASE_URL, op.name);
        let client = reqwest::Client::new();
        let resp = client
            .get(url)
            .header("X-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| WizardError::Generation(format!("veo poll failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(WizardError::Generation(format!(
                "veo poll error: HTTP {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| WizardError::Generation(format!("veo poll parse error: {e}")))
    }

    async fn fetch_video(&self, uri: &str) -> Result<Vec<u8>, WizardError> {
        // The file endpoint authenticates via query parameter, not header.
        let sep = if uri.contains('?') { '&' } else { '?' };
        let url = format!("{uri}{sep}key={}", self.api_key);

        let client = reqwest::Client::new();
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| WizardError::Generation(format!("video download failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(WizardError::Generation(format!(
                "video download error: HTTP {}",
                resp.status()
            )));
        }

        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| WizardError::Generation(format!("video stream error: {e}")))?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VIDEO_BYTES: &[u8] = b"not really mp4";

    fn done_operation(uri: &str) -> VideoOperation {
        serde_json::from_value(serde_json::json!({
            "name": "operations/abc",
            "done": true,
            "response": { "generatedVideos": [ { "video": { "uri": uri } } ] }
        }))
        .unwrap()
    }

    fn pending_operation() -> VideoOperation {
        serde_json::from_value(serde_json::json!({ "name": "operations/abc" })).unwrap()
    }

    /// Where a mock call should fail, if anywhere.
    #[derive(Clone, Copy, PartialEq)]
    enum FailAt {
        Nowhere,
        Submit,
        Poll,
        Fetch,
    }

    struct MockOps {
        pending_polls: usize,
        fail_at: FailAt,
        status_fetches: AtomicUsize,
    }

    impl MockOps {
        fn completing_after(pending_polls: usize) -> Self {
            Self {
                pending_polls,
                fail_at: FailAt::Nowhere,
                status_fetches: AtomicUsize::new(0),
            }
        }

        fn failing_at(fail_at: FailAt) -> Self {
            Self {
                pending_polls: 1,
                fail_at,
                status_fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VideoOperations for MockOps {
        async fn submit(
            &self,
            _payload: &ImagePayload,
            _prompt: &str,
        ) -> Result<VideoOperation, WizardError> {
            if self.fail_at == FailAt::Submit {
                return Err(WizardError::Generation("submit rejected".to_string()));
            }
            self.status_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(pending_operation())
        }

        async fn poll(&self, _op: &VideoOperation) -> Result<VideoOperation, WizardError> {
            if self.fail_at == FailAt::Poll {
                return Err(WizardError::Generation("poll transport error".to_string()));
            }
            // The counter includes the submit fetch.
            let seen = self.status_fetches.fetch_add(1, Ordering::SeqCst);
            if seen >= self.pending_polls {
                Ok(done_operation("https://example.com/video"))
            } else {
                Ok(pending_operation())
            }
        }

        async fn fetch_video(&self, _uri: &str) -> Result<Vec<u8>, WizardError> {
            if self.fail_at == FailAt::Fetch {
                return Err(WizardError::Generation("content fetch failed".to_string()));
            }
            Ok(VIDEO_BYTES.to_vec())
        }
    }

    fn payload() -> ImagePayload {
        ImagePayload {
            data: "QUJD".to_string(),
            mime_type: "image/jpeg".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_reports_increasing_elapsed_times() {
        let ops = MockOps::completing_after(3);
        let mut messages: Vec<String> = Vec::new();

        let bytes = run_generation(
            &ops,
            &payload(),
            "a walkthrough",
            Duration::from_secs(10),
            |msg| messages.push(msg.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(bytes, VIDEO_BYTES);
        // Submit plus three polls: N+1 status fetches for N pending polls.
        assert_eq!(ops.status_fetches.load(Ordering::SeqCst), 4);
        assert_eq!(
            messages,
            vec![
                "Preparing image for video generation...",
                "Starting walkthrough video generation...",
                "Generating video... (10s elapsed). This may take a few minutes.",
                "Generating video... (20s elapsed). This may take a few minutes.",
                "Generating video... (30s elapsed). This may take a few minutes.",
                "Video generated! Preparing download...",
                "Video ready!",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn already_complete_operation_skips_the_poll_loop() {
        struct InstantOps;

        #[async_trait]
        impl VideoOperations for InstantOps {
            async fn submit(
                &self,
                _payload: &ImagePayload,
                _prompt: &str,
            ) -> Result<VideoOperation, WizardError> {
                Ok(done_operation("https://example.com/video"))
            }
            async fn poll(&self, _op: &VideoOperation) -> Result<VideoOperation, WizardError> {
                panic!("must not poll a completed operation");
            }
            async fn fetch_video(&self, _uri: &str) -> Result<Vec<u8>, WizardError> {
                Ok(VIDEO_BYTES.to_vec())
            }
        }

        let mut messages: Vec<String> = Vec::new();
        let bytes = run_generation(
            &InstantOps,
            &payload(),
            "p",
            Duration::from_secs(10),
            |msg| messages.push(msg.to_string()),
        )
        .await
        .unwrap();
        assert_eq!(bytes, VIDEO_BYTES);
        assert!(!messages.iter().any(|m| m.contains("elapsed")));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_at_each_stage_aborts_the_operation() {
        for stage in [FailAt::Submit, FailAt::Poll, FailAt::Fetch] {
            let ops = MockOps::failing_at(stage);
            let err = run_generation(
                &ops,
                &payload(),
                "p",
                Duration::from_secs(10),
                |_msg| {},
            )
            .await
            .unwrap_err();
            assert!(matches!(err, WizardError::Generation(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_operation_without_video_is_an_error() {
        struct EmptyOps;

        #[async_trait]
        impl VideoOperations for EmptyOps {
            async fn submit(
                &self,
                _payload: &ImagePayload,
                _prompt: &str,
            ) -> Result<VideoOperation, WizardError> {
                Ok(serde_json::from_value(serde_json::json!({
                    "name": "operations/abc",
                    "done": true,
                    "response": { "generatedVideos": [] }
                }))
                .unwrap())
            }
            async fn poll(&self, _op: &VideoOperation) -> Result<VideoOperation, WizardError> {
                unreachable!()
            }
            async fn fetch_video(&self, _uri: &str) -> Result<Vec<u8>, WizardError> {
                unreachable!()
            }
        }

        let err = run_generation(&EmptyOps, &payload(), "p", Duration::from_secs(10), |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no video"));
    }

    #[tokio::test(start_paused = true)]
    async fn operation_level_error_is_surfaced() {
        struct ErrOps;

        #[async_trait]
        impl VideoOperations for ErrOps {
            async fn submit(
                &self,
                _payload: &ImagePayload,
                _prompt: &str,
            ) -> Result<VideoOperation, WizardError> {
                Ok(serde_json::from_value(serde_json::json!({
                    "name": "operations/abc",
                    "done": true,
                    "error": { "code": 8, "message": "quota exceeded" }
                }))
                .unwrap())
            }
            async fn poll(&self, _op: &VideoOperation) -> Result<VideoOperation, WizardError> {
                unreachable!()
            }
            async fn fetch_video(&self, _uri: &str) -> Result<Vec<u8>, WizardError> {
                unreachable!()
            }
        }

        let err = run_generation(&ErrOps, &payload(), "p", Duration::from_secs(10), |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn video_uri_is_found_in_either_completion_shape() {
        let op = done_operation("https://example.com/a.mp4");
        assert_eq!(op.first_video_uri(), Some("https://example.com/a.mp4"));

        let op: VideoOperation = serde_json::from_value(serde_json::json!({
            "name": "operations/abc",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [ { "video": { "uri": "https://example.com/b.mp4" } } ]
                }
            }
        }))
        .unwrap();
        assert_eq!(op.first_video_uri(), Some("https://example.com/b.mp4"));

        assert_eq!(pending_operation().first_video_uri(), None);
    }
}
