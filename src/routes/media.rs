use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::AppError;
use crate::media::asset::Asset;
use crate::media::remote::PageInfo;
use crate::media::service::UploadFile;

const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024; // 50 MB

const DEFAULT_LIST_SIZE: u32 = 120;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/media/upload", post(upload))
        .route_layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
        .route("/api/media", get(list_media))
}

// --- Handlers ---

#[derive(Debug, Deserialize)]
struct ListMediaParams {
    first: Option<u32>,
    after: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaListResponse {
    images: Vec<Asset>,
    page_info: PageInfo,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    images: Vec<Asset>,
}

async fn list_media(
    State(state): State<AppState>,
    Query(params): Query<ListMediaParams>,
) -> Result<Json<MediaListResponse>, AppError> {
    let page = state
        .media
        .list(params.first.unwrap_or(DEFAULT_LIST_SIZE), params.after.as_deref())
        .await?;

    Ok(Json(MediaListResponse {
        images: page.assets,
        page_info: page.page_info,
    }))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut files: Vec<UploadFile> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart data: {e}")))?
    {
        if field.name() != Some("files") {
            continue;
        }

        let name = field.file_name().unwrap_or("upload.jpg").to_string();
        let mime = field.content_type().unwrap_or("image/jpeg").to_string();
        if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(AppError::BadRequest(format!("Unsupported file type: {mime}")));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file: {e}")))?;

        files.push(UploadFile {
            name,
            mime_type: mime,
            bytes: bytes.to_vec(),
        });
    }

    if files.is_empty() {
        return Err(AppError::BadRequest("No files provided".into()));
    }

    tracing::info!(count = files.len(), "uploading files to the platform media library");
    let images = state.media.upload(&files).await?;
    Ok(Json(UploadResponse { images }))
}
