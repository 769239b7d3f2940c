/// Document upload endpoints
///
/// # Endpoints
///
/// - `POST /api/uploads/tax-returns/:tax_return_id` - Upload documents (multipart)
/// - `GET /api/uploads/tax-returns/:tax_return_id` - List documents of a return
/// - `GET /api/uploads/documents/:id` - Document metadata
/// - `DELETE /api/uploads/documents/:id` - Delete row, then file
/// - `GET /api/uploads/documents/:id/download` - File contents
///
/// Every endpoint requires access to the parent tax return.
///
/// # Upload
///
/// ```text
/// POST /api/uploads/tax-returns/:tax_return_id
/// Content-Type: multipart/form-data
///
/// documents=<file> (repeatable, at most MAX_FILES_PER_UPLOAD)
/// documentType=p60 (optional)
/// description=... (optional)
/// ```
///
/// All files are checked against the extension allow-list and size ceiling
/// before any is written. Files are stored as `<unix-millis>-<uuid>.<ext>`.
/// If resolving the return, the access check or the metadata insert fails,
/// every written file is removed again.

use std::path::Path;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use taxdesk_shared::{
    auth::middleware::Principal,
    models::document::{Document, NewDocument},
};
use uuid::Uuid;

use crate::{
    app::{jwt_auth_layer, AppState},
    config::UploadConfig,
    error::{ApiError, ApiResult},
    extract::{ApiPath, CurrentUser},
    routes::{tax_returns::load_accessible, MessageResponse},
    storage::remove_files,
};

/// Multipart field carrying files
const FILE_FIELD: &str = "documents";

/// Allowance for multipart framing and text fields
const FORM_OVERHEAD: usize = 1024 * 1024;

pub fn router(state: &AppState) -> Router<AppState> {
    let uploads = &state.config.uploads;
    let body_limit = uploads
        .max_files
        .saturating_mul(usize::try_from(uploads.max_file_size).unwrap_or(usize::MAX))
        .saturating_add(FORM_OVERHEAD);

    Router::new()
        .route(
            "/tax-returns/:tax_return_id",
            get(list_documents).post(upload_documents),
        )
        .route("/documents/:id", get(get_document).delete(delete_document))
        .route("/documents/:id/download", get(download_document))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_layer))
        .layer(DefaultBodyLimit::max(body_limit))
}

/// A validated file held in memory until it is written
#[derive(Debug)]
struct PendingFile {
    file_name: String,
    extension: String,
    mime_type: String,
    body: Bytes,
}

#[derive(Debug, Default)]
struct UploadForm {
    files: Vec<PendingFile>,
    document_type: Option<String>,
    description: Option<String>,
}

/// Lowercased extension of a client-supplied file name
fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Final path component of a client-supplied file name
fn base_name(file_name: &str) -> String {
    file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("document")
        .to_string()
}

/// Checks one file against the allow-list and size ceiling, returning its extension
fn check_file(config: &UploadConfig, file_name: &str, size: u64) -> ApiResult<String> {
    let extension = extension_of(file_name)
        .filter(|ext| config.is_allowed_extension(ext))
        .ok_or_else(|| {
            ApiError::invalid_field(
                FILE_FIELD,
                format!(
                    "File type of '{}' is not allowed. Allowed types: {}",
                    file_name,
                    config.allowed_types.join(", ")
                ),
            )
        })?;

    if size > config.max_file_size {
        return Err(ApiError::invalid_field(
            FILE_FIELD,
            format!(
                "File '{}' exceeds the maximum size of {} bytes",
                file_name, config.max_file_size
            ),
        ));
    }

    Ok(extension)
}

fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

fn stored_name(extension: &str) -> String {
    format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4(),
        extension
    )
}

/// `attachment` disposition with quotes and control characters stripped from the name
fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

/// Reads the whole form, rejecting it before anything touches the disk
async fn read_form(multipart: &mut Multipart, config: &UploadConfig) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);

        match name.as_deref() {
            Some(FILE_FIELD) => {
                if form.files.len() >= config.max_files {
                    return Err(ApiError::invalid_field(
                        FILE_FIELD,
                        format!("At most {} files can be uploaded at once", config.max_files),
                    ));
                }

                let file_name = base_name(field.file_name().unwrap_or_default());
                let body = field.bytes().await?;
                let extension = check_file(config, &file_name, body.len() as u64)?;

                form.files.push(PendingFile {
                    mime_type: mime_for_extension(&extension).to_string(),
                    file_name,
                    extension,
                    body,
                });
            }
            Some("documentType") => {
                form.document_type = Some(field.text().await?.trim().to_string())
                    .filter(|v| !v.is_empty());
            }
            Some("description") => {
                form.description = Some(field.text().await?.trim().to_string())
                    .filter(|v| !v.is_empty());
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unexpected multipart field");
            }
        }
    }

    if form.files.is_empty() {
        return Err(ApiError::invalid_field(FILE_FIELD, "No files uploaded"));
    }

    Ok(form)
}

/// Upload documents for a tax return
///
/// Answers `201` with the created document records.
///
/// # Errors
///
/// - `400 validation_error`: No files, too many files, disallowed type or oversized file
/// - `403 forbidden`: No access to the tax return
/// - `404 not_found`: Unknown tax return
pub async fn upload_documents(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(tax_return_id): ApiPath<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Vec<Document>>)> {
    let form = read_form(&mut multipart, &state.config.uploads).await?;

    let mut written = Vec::with_capacity(form.files.len());
    let mut documents = Vec::with_capacity(form.files.len());

    for file in form.files {
        let name = stored_name(&file.extension);
        let size = file.body.len() as i64;

        if let Err(e) = state.storage.put(&name, file.body).await {
            remove_files(state.storage.as_ref(), &written).await;
            return Err(e.into());
        }
        written.push(name.clone());

        documents.push(NewDocument {
            tax_return_id,
            uploaded_by: principal.user_id,
            file_name: file.file_name,
            stored_name: name,
            file_size: size,
            mime_type: file.mime_type,
            document_type: form.document_type.clone(),
            description: form.description.clone(),
        });
    }

    match record_documents(&state, &principal, tax_return_id, documents).await {
        Ok(created) => {
            tracing::info!(
                %tax_return_id,
                uploaded_by = %principal.user_id,
                count = created.len(),
                "Documents uploaded"
            );
            Ok((StatusCode::CREATED, Json(created)))
        }
        Err(e) => {
            remove_files(state.storage.as_ref(), &written).await;
            Err(e)
        }
    }
}

async fn record_documents(
    state: &AppState,
    principal: &Principal,
    tax_return_id: Uuid,
    documents: Vec<NewDocument>,
) -> ApiResult<Vec<Document>> {
    load_accessible(state, principal, tax_return_id).await?;
    Ok(Document::create_many(&state.db, documents).await?)
}

/// Loads a document whose parent return the caller may access
async fn load_document(state: &AppState, principal: &Principal, id: Uuid) -> ApiResult<Document> {
    let document = Document::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Document not found".to_string()))?;

    load_accessible(state, principal, document.tax_return_id).await?;
    Ok(document)
}

pub async fn list_documents(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(tax_return_id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<Document>>> {
    load_accessible(&state, &principal, tax_return_id).await?;
    Ok(Json(Document::list_by_tax_return(&state.db, tax_return_id).await?))
}

pub async fn get_document(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Document>> {
    Ok(Json(load_document(&state, &principal, id).await?))
}

/// Delete a document
///
/// The row goes first; a file that cannot be removed is logged and left behind.
pub async fn delete_document(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    let document = load_document(&state, &principal, id).await?;

    if !Document::delete(&state.db, id).await? {
        return Err(ApiError::NotFound("Document not found".to_string()));
    }

    if let Err(e) = state.storage.delete(&document.stored_name).await {
        tracing::warn!(
            document_id = %id,
            stored_name = %document.stored_name,
            error = %e,
            "Failed to remove document file"
        );
    }

    tracing::info!(document_id = %id, deleted_by = %principal.user_id, "Document deleted");

    Ok(Json(MessageResponse::new("Document deleted successfully")))
}

pub async fn download_document(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Response> {
    let document = load_document(&state, &principal, id).await?;
    let body = state.storage.get(&document.stored_name).await?;

    let content_type = HeaderValue::from_static(
        extension_of(&document.stored_name)
            .as_deref()
            .map_or("application/octet-stream", mime_for_extension),
    );
    let disposition = HeaderValue::from_str(&content_disposition(&document.file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(body),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::extract::{FromRequest, Request};
    use taxdesk_shared::models::user::Role;

    use crate::config::Config;
    use crate::storage::{FileStore, LocalFileStore, StorageError};

    const BOUNDARY: &str = "taxdesk-test-boundary";

    /// Multipart form with one `documents` part per `(file name, content type, body)`
    async fn multipart(files: &[(&str, &str, &[u8])]) -> Multipart {
        let mut body = Vec::new();
        for (name, content_type, contents) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"documents\"; \
                     filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(contents);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    /// Local store whose second write fails
    struct FailsOnSecondPut {
        inner: LocalFileStore,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl FileStore for FailsOnSecondPut {
        async fn put(&self, name: &str, body: Bytes) -> Result<(), StorageError> {
            if self.puts.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no space left on device",
                )));
            }
            self.inner.put(name, body).await
        }

        async fn get(&self, name: &str) -> Result<Bytes, StorageError> {
            self.inner.get(name).await
        }

        async fn delete(&self, name: &str) -> Result<(), StorageError> {
            self.inner.delete(name).await
        }
    }

    fn config() -> UploadConfig {
        UploadConfig {
            dir: PathBuf::from("./uploads"),
            max_file_size: 1024,
            max_files: 2,
            allowed_types: vec!["pdf".to_string(), "jpg".to_string(), "csv".to_string()],
        }
    }

    #[test]
    fn test_extension_and_base_name() {
        assert_eq!(extension_of("P60.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(base_name("C:\\Users\\jane\\p60.pdf"), "p60.pdf");
        assert_eq!(base_name("../../etc/passwd"), "passwd");
        assert_eq!(base_name(""), "document");
    }

    #[test]
    fn test_check_file() {
        let config = config();

        assert_eq!(check_file(&config, "bank.CSV", 10).unwrap(), "csv");
        assert!(matches!(
            check_file(&config, "payload.exe", 10),
            Err(ApiError::ValidationError(_))
        ));
        assert!(check_file(&config, "noext", 10).is_err());
        assert!(check_file(&config, "scan.jpg", 1024).is_ok());
        assert!(check_file(&config, "scan.jpg", 1025).is_err());
    }

    #[test]
    fn test_stored_name_shape() {
        let name = stored_name("pdf");
        let (millis, rest) = name.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert!(rest.ends_with(".pdf"));
        assert!(Uuid::parse_str(rest.trim_end_matches(".pdf")).is_ok());
        assert_ne!(stored_name("pdf"), name);
    }

    #[test]
    fn test_mime_and_disposition() {
        assert_eq!(mime_for_extension("jpeg"), "image/jpeg");
        assert_eq!(mime_for_extension("zip"), "application/octet-stream");
        assert_eq!(
            content_disposition("my \"P60\".pdf"),
            "attachment; filename=\"my P60.pdf\""
        );
    }

    #[tokio::test]
    async fn test_mime_type_comes_from_extension() {
        let mut form = multipart(&[("p60.pdf", "text/html", &b"%PDF-1.7"[..])]).await;

        let form = read_form(&mut form, &config()).await.unwrap();

        assert_eq!(form.files.len(), 1);
        assert_eq!(form.files[0].mime_type, "application/pdf");
        assert_eq!(form.files[0].extension, "pdf");
    }

    #[tokio::test]
    async fn test_failed_write_removes_earlier_files() {
        let config = Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgresql://nobody@127.0.0.1:1/none".to_string()),
            "JWT_SECRET" => Some("test-secret-key-at-least-32-bytes-long".to_string()),
            _ => None,
        })
        .unwrap();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database.url)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FailsOnSecondPut {
            inner: LocalFileStore::new(dir.path()).await.unwrap(),
            puts: AtomicUsize::new(0),
        });
        let state = AppState::new(pool, config, store);

        let principal = Principal {
            user_id: Uuid::new_v4(),
            email: "jane@example.com".to_string(),
            role: Role::Customer,
            is_verified: true,
        };
        let form = multipart(&[
            ("p60.pdf", "application/pdf", &b"%PDF-1.7"[..]),
            ("bank.csv", "text/csv", &b"date,amount"[..]),
        ])
        .await;

        let result = upload_documents(
            State(state),
            CurrentUser(principal),
            ApiPath(Uuid::new_v4()),
            form,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
