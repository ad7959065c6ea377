use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::media::asset::Asset;
use crate::media::remote::{PageInfo, PlatformApi, RegisterSource, ResourceKind, SlotRequest};

/// The platform caps listing pages at 250 nodes.
pub const MAX_PAGE_SIZE: u32 = 250;

#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("transient platform failure: {0}")]
    Transient(String),
    #[error("staging rejected: {0}")]
    Staging(String),
    #[error("object storage rejected upload with status {status}: {body}")]
    Transfer { status: u16, body: String },
    #[error("registration rejected: {0}")]
    Registration(String),
    #[error("platform protocol violation: {0}")]
    ProtocolInvariant(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl MediaError {
    /// Throttles, flakes and object-store hiccups are worth another try;
    /// remote validation verdicts and protocol violations are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Transfer { .. })
    }
}

/// Fixed-count, fixed-delay retry. Not a backoff algorithm; tests inject a
/// zero-delay policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(700),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T, MediaError>
    where
        Fut: Future<Output = Result<T, MediaError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::debug!(attempt, error = %e, "remote call failed, retrying");
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A locally-selected file headed for the upload pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// One normalized page of the remote media library.
#[derive(Debug, Clone)]
pub struct MediaPage {
    pub assets: Vec<Asset>,
    pub page_info: PageInfo,
}

/// Server-side media operations: paged listing, id resolution, and the
/// stage/transfer/register upload pipeline. Every remote call goes
/// through the retry policy; every node goes through `Asset::from_node`
/// so preview-less records never leave this module.
#[derive(Clone)]
pub struct MediaService<P> {
    api: P,
    retry: RetryPolicy,
}

impl<P: PlatformApi> MediaService<P> {
    pub fn new(api: P) -> Self {
        Self::with_retry(api, RetryPolicy::default())
    }

    pub fn with_retry(api: P, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// One fresh remote round trip per call; no caching, no cross-page
    /// dedup. `page_size` is clamped to `[1, 250]`.
    pub async fn list(&self, page_size: u32, after: Option<&str>) -> Result<MediaPage, MediaError> {
        let first = page_size.clamp(1, MAX_PAGE_SIZE);
        let page = self.retry.run(|| self.api.list_files(first, after)).await?;
        Ok(MediaPage {
            assets: page.nodes.iter().filter_map(Asset::from_node).collect(),
            page_info: page.page_info,
        })
    }

    /// Batch-resolve opaque ids to display records. Result order is the
    /// remote's, not the input's. Empty input never touches the network.
    pub async fn resolve_by_ids(&self, ids: &[String]) -> Result<Vec<Asset>, MediaError> {
        let mut seen = HashSet::new();
        let clean: Vec<String> = ids
            .iter()
            .filter(|id| !id.is_empty() && seen.insert(id.as_str()))
            .cloned()
            .collect();
        if clean.is_empty() {
            return Ok(Vec::new());
        }

        let nodes = self.retry.run(|| self.api.files_by_ids(&clean)).await?;
        Ok(nodes.iter().filter_map(Asset::from_node).collect())
    }

    /// Three-phase upload: request staged slots, transfer each payload to
    /// its slot, register the transferred objects. All-or-nothing: any
    /// terminal phase failure aborts with no partial result. Output order
    /// matches input order.
    pub async fn upload(&self, files: &[UploadFile]) -> Result<Vec<Asset>, MediaError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<SlotRequest> = files
            .iter()
            .map(|f| SlotRequest {
                filename: f.name.clone(),
                mime_type: f.mime_type.clone(),
                kind: ResourceKind::from_mime(&f.mime_type),
            })
            .collect();

        let targets = self
            .retry
            .run(|| self.api.create_upload_slots(&requests))
            .await?;
        if targets.len() != files.len() {
            return Err(MediaError::ProtocolInvariant(format!(
                "requested {} upload slots, remote returned {}",
                files.len(),
                targets.len()
            )));
        }

        for (file, target) in files.iter().zip(&targets) {
            self.retry.run(|| self.api.transfer(target, file)).await?;
        }

        let sources: Vec<RegisterSource> = targets
            .iter()
            .zip(files)
            .map(|(target, file)| RegisterSource {
                source_location: target.resource_url.clone(),
                alt_text: file.name.clone(),
                kind: ResourceKind::from_mime(&file.mime_type),
            })
            .collect();

        let created = self.retry.run(|| self.api.register_assets(&sources)).await?;
        let assets: Vec<Asset> = created.iter().filter_map(Asset::from_node).collect();
        tracing::info!(requested = files.len(), registered = assets.len(), "media upload complete");
        Ok(assets)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::media::remote::{FileNode, FilePage, StagedTarget};

    fn zero_delay() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
        }
    }

    fn image_node(id: &str) -> FileNode {
        FileNode::Image {
            id: id.to_string(),
            alt: None,
            preview_url: Some(format!("https://cdn.example.com/previews/{id}.jpg")),
            image_url: None,
            source_url: Some(format!("https://cdn.example.com/sources/{id}.jpg")),
        }
    }

    fn bare_node(id: &str) -> FileNode {
        FileNode::Image {
            id: id.to_string(),
            alt: None,
            preview_url: None,
            image_url: None,
            source_url: None,
        }
    }

    fn page_of(nodes: Vec<FileNode>, has_next: bool) -> FilePage {
        FilePage {
            nodes,
            page_info: PageInfo {
                has_next_page: has_next,
                end_cursor: has_next.then(|| "cursor-1".to_string()),
            },
        }
    }

    fn target(n: usize) -> StagedTarget {
        StagedTarget {
            url: format!("https://storage.example.com/slot-{n}"),
            resource_url: format!("https://storage.example.com/resource-{n}"),
            parameters: vec![],
        }
    }

    fn upload_file(name: &str) -> UploadFile {
        UploadFile {
            name: name.to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[derive(Default)]
    struct MockApi {
        list_results: Mutex<VecDeque<Result<FilePage, MediaError>>>,
        list_calls: AtomicUsize,
        seen_first: Mutex<Vec<u32>>,
        nodes_results: Mutex<VecDeque<Result<Vec<FileNode>, MediaError>>>,
        nodes_calls: AtomicUsize,
        seen_ids: Mutex<Vec<Vec<String>>>,
        slot_results: Mutex<VecDeque<Result<Vec<StagedTarget>, MediaError>>>,
        slot_calls: AtomicUsize,
        transfer_results: Mutex<VecDeque<Result<(), MediaError>>>,
        transfer_calls: AtomicUsize,
        register_results: Mutex<VecDeque<Result<Vec<FileNode>, MediaError>>>,
        register_calls: AtomicUsize,
        seen_sources: Mutex<Vec<Vec<RegisterSource>>>,
    }

    impl MockApi {
        fn queue_list(&self, result: Result<FilePage, MediaError>) {
            self.list_results.lock().unwrap().push_back(result);
        }

        fn queue_nodes(&self, result: Result<Vec<FileNode>, MediaError>) {
            self.nodes_results.lock().unwrap().push_back(result);
        }

        fn queue_slots(&self, result: Result<Vec<StagedTarget>, MediaError>) {
            self.slot_results.lock().unwrap().push_back(result);
        }

        fn queue_transfer(&self, result: Result<(), MediaError>) {
            self.transfer_results.lock().unwrap().push_back(result);
        }

        fn queue_register(&self, result: Result<Vec<FileNode>, MediaError>) {
            self.register_results.lock().unwrap().push_back(result);
        }
    }

    #[async_trait]
    impl PlatformApi for MockApi {
        async fn list_files(&self, first: u32, _after: Option<&str>) -> Result<FilePage, MediaError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_first.lock().unwrap().push(first);
            self.list_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(page_of(vec![], false)))
        }

        async fn files_by_ids(&self, ids: &[String]) -> Result<Vec<FileNode>, MediaError> {
            self.nodes_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_ids.lock().unwrap().push(ids.to_vec());
            self.nodes_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }

        async fn create_upload_slots(
            &self,
            requests: &[SlotRequest],
        ) -> Result<Vec<StagedTarget>, MediaError> {
            self.slot_calls.fetch_add(1, Ordering::SeqCst);
            self.slot_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok((0..requests.len()).map(target).collect()))
        }

        async fn transfer(&self, _target: &StagedTarget, _file: &UploadFile) -> Result<(), MediaError> {
            self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            self.transfer_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn register_assets(
            &self,
            sources: &[RegisterSource],
        ) -> Result<Vec<FileNode>, MediaError> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_sources.lock().unwrap().push(sources.to_vec());
            self.register_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn service() -> MediaService<MockApi> {
        MediaService::with_retry(MockApi::default(), zero_delay())
    }

    #[tokio::test]
    async fn list_clamps_page_size_to_platform_bounds() {
        let svc = service();
        svc.list(500, None).await.unwrap();
        svc.list(0, None).await.unwrap();
        svc.list(60, None).await.unwrap();
        assert_eq!(*svc.api.seen_first.lock().unwrap(), vec![250, 1, 60]);
    }

    #[tokio::test]
    async fn list_drops_nodes_without_previews() {
        let svc = service();
        svc.api
            .queue_list(Ok(page_of(vec![image_node("a"), bare_node("b"), image_node("c")], true)));

        let page = svc.list(60, None).await.unwrap();
        let ids: Vec<&str> = page.assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(page.page_info.has_next_page);
    }

    #[tokio::test]
    async fn list_retries_transient_failures_with_fixed_budget() {
        let svc = service();
        svc.api.queue_list(Err(MediaError::Transient("throttled".into())));
        svc.api.queue_list(Err(MediaError::Transient("throttled".into())));
        svc.api.queue_list(Ok(page_of(vec![image_node("a")], false)));

        let page = svc.list(60, None).await.unwrap();
        assert_eq!(page.assets.len(), 1);
        assert_eq!(svc.api.list_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn list_gives_up_after_exhausting_attempts() {
        let svc = service();
        for _ in 0..4 {
            svc.api.queue_list(Err(MediaError::Transient("flake".into())));
        }

        let err = svc.list(60, None).await.unwrap_err();
        assert!(matches!(err, MediaError::Transient(_)));
        assert_eq!(svc.api.list_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn resolve_empty_input_short_circuits() {
        let svc = service();
        assert!(svc.resolve_by_ids(&[]).await.unwrap().is_empty());
        assert_eq!(svc.api.nodes_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolve_filters_duplicate_and_empty_ids() {
        let svc = service();
        svc.api.queue_nodes(Ok(vec![image_node("a"), image_node("b")]));

        let ids = vec!["a".to_string(), String::new(), "a".to_string(), "b".to_string()];
        svc.resolve_by_ids(&ids).await.unwrap();
        assert_eq!(
            *svc.api.seen_ids.lock().unwrap(),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }

    #[tokio::test]
    async fn upload_preserves_input_order_and_registers_sources() {
        let svc = service();
        svc.api.queue_slots(Ok(vec![target(0), target(1)]));
        svc.api.queue_register(Ok(vec![image_node("new-a"), image_node("new-b")]));

        let files = vec![upload_file("a.jpg"), upload_file("b.jpg")];
        let assets = svc.upload(&files).await.unwrap();

        let ids: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["new-a", "new-b"]);
        assert_eq!(svc.api.transfer_calls.load(Ordering::SeqCst), 2);

        let sources = svc.api.seen_sources.lock().unwrap();
        assert_eq!(sources[0][0].source_location, "https://storage.example.com/resource-0");
        assert_eq!(sources[0][0].alt_text, "a.jpg");
        assert_eq!(sources[0][1].alt_text, "b.jpg");
    }

    #[tokio::test]
    async fn upload_slot_count_mismatch_is_fatal_and_unretried() {
        let svc = service();
        svc.api.queue_slots(Ok(vec![target(0)]));

        let files = vec![upload_file("a.jpg"), upload_file("b.jpg")];
        let err = svc.upload(&files).await.unwrap_err();
        assert!(matches!(err, MediaError::ProtocolInvariant(_)));
        assert_eq!(svc.api.slot_calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.api.transfer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(svc.api.register_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_staging_user_errors_fail_fast() {
        let svc = service();
        svc.api.queue_slots(Err(MediaError::Staging("bad filename".into())));

        let err = svc.upload(&[upload_file("a.jpg")]).await.unwrap_err();
        assert!(matches!(err, MediaError::Staging(_)));
        // Validation verdicts are not retried.
        assert_eq!(svc.api.slot_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upload_transfer_failure_aborts_before_registration() {
        let svc = service();
        svc.api.queue_slots(Ok(vec![target(0)]));
        for _ in 0..3 {
            svc.api.queue_transfer(Err(MediaError::Transfer {
                status: 500,
                body: "internal".into(),
            }));
        }

        let err = svc.upload(&[upload_file("a.jpg")]).await.unwrap_err();
        assert!(matches!(err, MediaError::Transfer { status: 500, .. }));
        // The transfer phase burned its whole retry budget first.
        assert_eq!(svc.api.transfer_calls.load(Ordering::SeqCst), 3);
        assert_eq!(svc.api.register_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_registration_user_errors_surface() {
        let svc = service();
        svc.api.queue_slots(Ok(vec![target(0)]));
        svc.api.queue_register(Err(MediaError::Registration("unsupported source".into())));

        let err = svc.upload(&[upload_file("a.jpg")]).await.unwrap_err();
        assert!(matches!(err, MediaError::Registration(_)));
        assert_eq!(svc.api.register_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upload_then_resolve_round_trips_the_same_records() {
        let svc = service();
        svc.api.queue_slots(Ok(vec![target(0), target(1)]));
        svc.api.queue_register(Ok(vec![image_node("new-a"), image_node("new-b")]));
        // The remote batch lookup answers in its own order.
        svc.api.queue_nodes(Ok(vec![image_node("new-b"), image_node("new-a")]));

        let uploaded = svc
            .upload(&[upload_file("a.jpg"), upload_file("b.jpg")])
            .await
            .unwrap();
        let ids: Vec<String> = uploaded.iter().map(|a| a.id.clone()).collect();

        let resolved = svc.resolve_by_ids(&ids).await.unwrap();
        let mut uploaded_sorted = uploaded.clone();
        uploaded_sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let mut resolved_sorted = resolved.clone();
        resolved_sorted.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(uploaded_sorted, resolved_sorted);
    }
}
