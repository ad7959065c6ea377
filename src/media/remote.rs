use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::media::service::{MediaError, UploadFile};

/// One page of the remote file listing.
#[derive(Debug, Clone)]
pub struct FilePage {
    pub nodes: Vec<FileNode>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// The heterogeneous shapes the platform's file listing returns, collapsed
/// to the fields the admin actually reads. This union stays behind the
/// media service boundary; everything downstream sees `Asset`.
#[derive(Debug, Clone)]
pub enum FileNode {
    Image {
        id: String,
        alt: Option<String>,
        preview_url: Option<String>,
        image_url: Option<String>,
        source_url: Option<String>,
    },
    Generic {
        id: String,
        alt: Option<String>,
        preview_url: Option<String>,
        file_url: Option<String>,
    },
    Video {
        id: String,
        alt: Option<String>,
        preview_url: Option<String>,
        source_url: Option<String>,
    },
}

/// Upload-slot request for one file, sent to the staging mutation.
#[derive(Debug, Clone)]
pub struct SlotRequest {
    pub filename: String,
    pub mime_type: String,
    pub kind: ResourceKind,
}

/// A short-lived remote-issued upload target: POST `parameters` plus the
/// file payload to `url`; `resource_url` becomes the registered source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedTarget {
    pub url: String,
    pub resource_url: String,
    #[serde(default)]
    pub parameters: Vec<StagedParameter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedParameter {
    pub name: String,
    pub value: String,
}

/// Registration input for one transferred object.
#[derive(Debug, Clone)]
pub struct RegisterSource {
    pub source_location: String,
    pub alt_text: String,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Video,
    File,
}

impl ResourceKind {
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("video/") {
            Self::Video
        } else {
            Self::File
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Video => "VIDEO",
            Self::File => "FILE",
        }
    }
}

/// Capability boundary to the commerce platform. The media service talks
/// only through this trait; tests swap in a scripted implementation.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn list_files(&self, first: u32, after: Option<&str>) -> Result<FilePage, MediaError>;

    async fn files_by_ids(&self, ids: &[String]) -> Result<Vec<FileNode>, MediaError>;

    async fn create_upload_slots(
        &self,
        requests: &[SlotRequest],
    ) -> Result<Vec<StagedTarget>, MediaError>;

    async fn transfer(&self, target: &StagedTarget, file: &UploadFile) -> Result<(), MediaError>;

    async fn register_assets(&self, sources: &[RegisterSource])
    -> Result<Vec<FileNode>, MediaError>;
}

// --- Admin GraphQL documents ---

const Q_FILES_LIST: &str = "
  query FilesList($first: Int!, $after: String) {
    files(first: $first, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes {
        __typename
        ... on MediaImage {
          id
          alt
          preview { image { url } }
          image { url }
          originalSource { url }
        }
        ... on GenericFile {
          id
          alt
          url
          preview { image { url } }
        }
        ... on Video {
          id
          alt
          preview { image { url } }
          originalSource { url }
        }
      }
    }
  }
";

const Q_FILES_BY_IDS: &str = "
  query FilesByIds($ids: [ID!]!) {
    nodes(ids: $ids) {
      __typename
      id
      ... on MediaImage {
        alt
        preview { image { url } }
        image { url }
        originalSource { url }
      }
      ... on GenericFile {
        alt
        url
        preview { image { url } }
      }
      ... on Video {
        alt
        preview { image { url } }
        originalSource { url }
      }
    }
  }
";

const M_STAGED_UPLOADS_CREATE: &str = "
  mutation StagedUploads($inputs: [StagedUploadInput!]!) {
    stagedUploadsCreate(input: $inputs) {
      stagedTargets {
        resourceUrl
        url
        parameters { name value }
      }
      userErrors { field message }
    }
  }
";

const M_FILE_CREATE: &str = "
  mutation FileCreate($files: [FileCreateInput!]!) {
    fileCreate(files: $files) {
      files {
        __typename
        id
        ... on MediaImage {
          alt
          preview { image { url } }
          image { url }
          originalSource { url }
        }
        ... on GenericFile {
          alt
          url
          preview { image { url } }
        }
        ... on Video {
          alt
          preview { image { url } }
          originalSource { url }
        }
      }
      userErrors { field message }
    }
  }
";

const ACCESS_TOKEN_HEADER: &str = "X-Admin-Access-Token";

/// Production `PlatformApi` over the platform's Admin GraphQL endpoint and
/// the staged-upload object store.
#[derive(Clone)]
pub struct AdminClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl AdminClient {
    pub fn new(endpoint: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            token: token.to_string(),
        }
    }

    /// Post one GraphQL document and return its `data` payload.
    /// Transport failures, non-2xx statuses, GraphQL-level errors (the
    /// platform reports throttles this way) and empty responses all come
    /// back as `Transient` so the service's retry policy applies.
    async fn execute(&self, query: &str, variables: Value) -> Result<Value, MediaError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header(ACCESS_TOKEN_HEADER, &self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| MediaError::Transient(format!("admin request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MediaError::Transient(format!(
                "admin responded with status {status}"
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| MediaError::Transient(format!("admin response was not JSON: {e}")))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let msgs: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect();
                return Err(MediaError::Transient(format!(
                    "admin reported errors: {}",
                    msgs.join("; ")
                )));
            }
        }

        match body.get("data") {
            Some(data) if !data.is_null() => Ok(data.clone()),
            _ => Err(MediaError::Transient("admin returned an empty response".into())),
        }
    }
}

#[async_trait]
impl PlatformApi for AdminClient {
    async fn list_files(&self, first: u32, after: Option<&str>) -> Result<FilePage, MediaError> {
        let data = self
            .execute(Q_FILES_LIST, json!({ "first": first, "after": after }))
            .await?;
        let files: FilesData = decode(data)?;
        Ok(FilePage {
            nodes: files
                .files
                .nodes
                .into_iter()
                .filter_map(RawNode::into_node)
                .collect(),
            page_info: files.files.page_info,
        })
    }

    async fn files_by_ids(&self, ids: &[String]) -> Result<Vec<FileNode>, MediaError> {
        let data = self.execute(Q_FILES_BY_IDS, json!({ "ids": ids })).await?;
        let nodes: NodesData = decode(data)?;
        Ok(nodes
            .nodes
            .into_iter()
            .flatten()
            .filter_map(RawNode::into_node)
            .collect())
    }

    async fn create_upload_slots(
        &self,
        requests: &[SlotRequest],
    ) -> Result<Vec<StagedTarget>, MediaError> {
        let inputs: Vec<Value> = requests
            .iter()
            .map(|r| {
                json!({
                    "resource": r.kind.as_str(),
                    "filename": r.filename,
                    "mimeType": r.mime_type,
                    "httpMethod": "POST",
                })
            })
            .collect();

        let data = self
            .execute(M_STAGED_UPLOADS_CREATE, json!({ "inputs": inputs }))
            .await?;
        let staged: StagedData = decode(data)?;
        let payload = staged.staged_uploads_create;
        if !payload.user_errors.is_empty() {
            return Err(MediaError::Staging(join_user_errors(&payload.user_errors)));
        }
        Ok(payload.staged_targets.unwrap_or_default())
    }

    async fn transfer(&self, target: &StagedTarget, file: &UploadFile) -> Result<(), MediaError> {
        let mut form = reqwest::multipart::Form::new();
        for p in &target.parameters {
            form = form.text(p.name.clone(), p.value.clone());
        }
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| MediaError::Validation(format!("invalid mime type {}: {e}", file.mime_type)))?;
        form = form.part("file", part);

        let resp = self
            .http
            .post(&target.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::Transient(format!("upload request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MediaError::Transfer {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn register_assets(
        &self,
        sources: &[RegisterSource],
    ) -> Result<Vec<FileNode>, MediaError> {
        let files: Vec<Value> = sources
            .iter()
            .map(|s| {
                json!({
                    "originalSource": s.source_location,
                    "alt": s.alt_text,
                    "contentType": s.kind.as_str(),
                })
            })
            .collect();

        let data = self.execute(M_FILE_CREATE, json!({ "files": files })).await?;
        let created: CreateData = decode(data)?;
        let payload = created.file_create;
        if !payload.user_errors.is_empty() {
            return Err(MediaError::Registration(join_user_errors(&payload.user_errors)));
        }
        Ok(payload
            .files
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawNode::into_node)
            .collect())
    }
}

// --- Response decoding ---

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, MediaError> {
    serde_json::from_value(data)
        .map_err(|e| MediaError::ProtocolInvariant(format!("unexpected admin response shape: {e}")))
}

fn join_user_errors(errors: &[RawUserError]) -> String {
    errors
        .iter()
        .map(|e| match &e.field {
            Some(field) if !field.is_empty() => format!("{}: {}", field.join("."), e.message),
            _ => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Deserialize)]
struct FilesData {
    files: RawConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<RawNode>,
}

#[derive(Deserialize)]
struct NodesData {
    #[serde(default)]
    nodes: Vec<Option<RawNode>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StagedData {
    staged_uploads_create: StagedPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StagedPayload {
    staged_targets: Option<Vec<StagedTarget>>,
    #[serde(default)]
    user_errors: Vec<RawUserError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    file_create: CreatePayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePayload {
    files: Option<Vec<RawNode>>,
    #[serde(default)]
    user_errors: Vec<RawUserError>,
}

#[derive(Deserialize)]
struct RawUserError {
    #[serde(default)]
    field: Option<Vec<String>>,
    message: String,
}

/// Loosely-typed node as the wire delivers it; `into_node` resolves the
/// `__typename` tag. Unknown tags and id-less nodes collapse to `None`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    #[serde(rename = "__typename")]
    typename: Option<String>,
    id: Option<String>,
    alt: Option<String>,
    url: Option<String>,
    preview: Option<RawPreview>,
    image: Option<RawImage>,
    original_source: Option<RawSource>,
}

#[derive(Deserialize)]
struct RawPreview {
    image: Option<RawImage>,
}

#[derive(Deserialize)]
struct RawImage {
    url: Option<String>,
}

#[derive(Deserialize)]
struct RawSource {
    url: Option<String>,
}

impl RawNode {
    fn into_node(self) -> Option<FileNode> {
        let id = self.id?;
        let preview_url = self.preview.and_then(|p| p.image).and_then(|i| i.url);
        match self.typename.as_deref() {
            Some("MediaImage") => Some(FileNode::Image {
                id,
                alt: self.alt,
                preview_url,
                image_url: self.image.and_then(|i| i.url),
                source_url: self.original_source.and_then(|s| s.url),
            }),
            Some("GenericFile") => Some(FileNode::Generic {
                id,
                alt: self.alt,
                preview_url,
                file_url: self.url,
            }),
            Some("Video") => Some(FileNode::Video {
                id,
                alt: self.alt,
                preview_url,
                source_url: self.original_source.and_then(|s| s.url),
            }),
            _ => None,
        }
    }
}
