//! Google Drive v3 implementation of `RemoteStore`.
//!
//! Every request carries the stored access token. A 401 triggers one
//! refresh-token grant and exactly one retry; the refreshed token is written
//! back through the `StateStore`. Responses are decoded into typed structs at
//! this boundary, so a payload missing a required field fails here.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use drive_sync_core::entry::EntryKind;
use drive_sync_core::remote::{RemoteEntry, RemoteError, RemoteStore, Result};
use drive_sync_core::state::{Credentials, StateStore};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// MIME type Drive uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Prefix of Google-native document types, which have no downloadable content
const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

/// Alias Drive accepts for the top of "My Drive"
pub const DRIVE_ROOT_ALIAS: &str = "root";

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

pub const DEFAULT_REDIRECT_URI: &str = "https://obsidian.md";

const FILE_FIELDS: &str = "id, name, mimeType, modifiedTime, md5Checksum, trashed";

const PAGE_SIZE: &str = "1000";

const MULTIPART_BOUNDARY: &str = "drive_sync_multipart_5f1c2a9e";

/// Base URLs of the Drive and OAuth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
    pub auth_url: String,
    pub token_url: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

impl DriveEndpoints {
    /// All endpoints under one server, laid out like the Google hosts.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            api_base: format!("{}/drive/v3", base),
            upload_base: format!("{}/upload/drive/v3", base),
            auth_url: format!("{}/o/oauth2/v2/auth", base),
            token_url: format!("{}/token", base),
        }
    }
}

/// OAuth client registration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl OAuthClient {
    /// Consent page URL requesting offline access to the whole drive.
    pub fn authorization_url(&self, endpoints: &DriveEndpoints) -> std::result::Result<Url, url::ParseError> {
        Url::parse_with_params(
            &endpoints.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// File resource as returned by Drive.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    modified_time: DateTime<Utc>,
    #[serde(default)]
    md5_checksum: Option<String>,
    #[serde(default)]
    trashed: bool,
}

impl DriveFile {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    fn is_google_document(&self) -> bool {
        !self.is_folder() && self.mime_type.starts_with(GOOGLE_APPS_PREFIX)
    }

    fn into_entry(self) -> RemoteEntry {
        let kind = if self.is_folder() {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        RemoteEntry {
            remote_id: self.id,
            name: self.name,
            kind,
            modified_at_millis: self.modified_time.timestamp_millis(),
            content_hash: self.md5_checksum,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

fn rfc3339_from_millis(millis: i64) -> Result<String> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| RemoteError::Decode(format!("timestamp out of range: {}", millis)))
}

/// Quote a value for use inside a Drive `q` expression.
fn query_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `multipart/related` body: JSON metadata part followed by the media part.
fn multipart_body(metadata: &serde_json::Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
            b = MULTIPART_BOUNDARY,
            m = metadata,
            t = mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--", MULTIPART_BOUNDARY).as_bytes());
    body
}

/// Map non-success statuses onto `RemoteError`.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        _ => RemoteError::Http {
            status: status.as_u16(),
            message,
        },
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}

/// Drive client holding the vault's credentials.
pub struct DriveClient<S> {
    http: reqwest::Client,
    endpoints: DriveEndpoints,
    oauth: OAuthClient,
    state: S,
    credentials: RwLock<Credentials>,
}

impl<S: StateStore> DriveClient<S> {
    pub fn new(
        http: reqwest::Client,
        endpoints: DriveEndpoints,
        oauth: OAuthClient,
        state: S,
        credentials: Credentials,
    ) -> Self {
        Self {
            http,
            endpoints,
            oauth,
            state,
            credentials: RwLock::new(credentials),
        }
    }

    pub fn endpoints(&self) -> &DriveEndpoints {
        &self.endpoints
    }

    pub fn authorization_url(&self) -> std::result::Result<Url, url::ParseError> {
        self.oauth.authorization_url(&self.endpoints)
    }

    /// Trade an authorization code for tokens and persist them.
    pub async fn exchange_code(&self, code: &str) -> Result<Credentials> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.oauth.client_id.as_str()),
                ("client_secret", self.oauth.client_secret.as_str()),
                ("redirect_uri", self.oauth.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(transport)?;
        let tokens: TokenResponse = decode(check_status(response).await?).await?;

        let mut credentials = self.credentials.write().await;
        credentials.access_token = Some(tokens.access_token);
        if tokens.refresh_token.is_some() {
            credentials.refresh_token = tokens.refresh_token;
        }
        self.state
            .save_credentials(&credentials)
            .await
            .map_err(|e| RemoteError::Transport(format!("failed to store credentials: {}", e)))?;

        info!("Stored new Google Drive credentials");
        Ok(credentials.clone())
    }

    async fn access_token(&self) -> Result<String> {
        self.credentials
            .read()
            .await
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RemoteError::Unauthorized("no access token".into()))
    }

    /// Exchange the refresh token for a new access token.
    async fn refresh_access_token(&self, rejected: &str) -> Result<String> {
        let mut credentials = self.credentials.write().await;

        // Another request already refreshed while we waited for the lock
        if let Some(current) = credentials.access_token.as_deref() {
            if current != rejected && !current.is_empty() {
                return Ok(current.to_string());
            }
        }

        let refresh_token = credentials
            .refresh_token
            .clone()
            .ok_or_else(|| RemoteError::Unauthorized("access token rejected and no refresh token stored".into()))?;

        debug!("Refreshing access token");
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("client_id", self.oauth.client_id.as_str()),
                ("client_secret", self.oauth.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Unauthorized(format!(
                "token refresh failed with status {}: {}",
                status.as_u16(),
                message
            )));
        }
        let tokens: TokenResponse = decode(response).await?;

        credentials.access_token = Some(tokens.access_token.clone());
        if tokens.refresh_token.is_some() {
            credentials.refresh_token = tokens.refresh_token;
        }
        if let Err(e) = self.state.save_credentials(&credentials).await {
            warn!("Refreshed access token could not be stored: {}", e);
        }

        info!("Access token refreshed");
        Ok(tokens.access_token)
    }

    /// Send an authorized request, refreshing the token and retrying once on 401.
    async fn send(&self, build: impl Fn() -> RequestBuilder + Send + Sync) -> Result<Response> {
        let token = self.access_token().await?;
        let response = build().bearer_auth(&token).send().await.map_err(transport)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        let token = self.refresh_access_token(&token).await?;
        let response = build().bearer_auth(&token).send().await.map_err(transport)?;
        check_status(response).await
    }

    /// Run a files.list query to completion.
    async fn list_query(&self, query: &str) -> Result<Vec<DriveFile>> {
        let url = format!("{}/files", self.endpoints.api_base);
        let fields = format!("nextPageToken, files({})", FILE_FIELDS);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .send(|| {
                    let mut request = self.http.get(&url).query(&[
                        ("q", query),
                        ("fields", fields.as_str()),
                        ("pageSize", PAGE_SIZE),
                    ]);
                    if let Some(token) = &page_token {
                        request = request.query(&[("pageToken", token.as_str())]);
                    }
                    request
                })
                .await?;
            let page: FileList = decode(response).await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl<S: StateStore> RemoteStore for DriveClient<S> {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        let query = format!("{} in parents and trashed = false", query_literal(folder_id));
        let files = self.list_query(&query).await?;

        Ok(files
            .into_iter()
            .filter(|file| {
                if file.is_google_document() {
                    debug!("Skipping Google document {} ({})", file.name, file.mime_type);
                    return false;
                }
                true
            })
            .map(DriveFile::into_entry)
            .collect())
    }

    async fn fetch_metadata(&self, id: &str) -> Result<RemoteEntry> {
        let url = format!("{}/files/{}", self.endpoints.api_base, id);
        let response = self
            .send(|| self.http.get(&url).query(&[("fields", FILE_FIELDS)]))
            .await?;
        let file: DriveFile = decode(response).await?;
        if file.trashed {
            return Err(RemoteError::NotFound(format!("{} is in the trash", id)));
        }
        Ok(file.into_entry())
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/files/{}", self.endpoints.api_base, id);
        let response = self
            .send(|| self.http.get(&url).query(&[("alt", "media")]))
            .await?;
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        name: &str,
        parent_id: &str,
        content: &[u8],
        mime_type: &str,
        modified_at_millis: i64,
    ) -> Result<RemoteEntry> {
        let metadata = json!({
            "name": name,
            "parents": [parent_id],
            "mimeType": mime_type,
            "modifiedTime": rfc3339_from_millis(modified_at_millis)?,
        });
        let body = multipart_body(&metadata, mime_type, content);
        let url = format!("{}/files", self.endpoints.upload_base);

        let response = self
            .send(|| {
                self.http
                    .post(&url)
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
                    )
                    .body(body.clone())
            })
            .await?;
        let file: DriveFile = decode(response).await?;
        Ok(file.into_entry())
    }

    async fn update(
        &self,
        id: &str,
        content: &[u8],
        mime_type: &str,
        modified_at_millis: i64,
    ) -> Result<RemoteEntry> {
        let metadata = json!({
            "mimeType": mime_type,
            "modifiedTime": rfc3339_from_millis(modified_at_millis)?,
        });
        let body = multipart_body(&metadata, mime_type, content);
        let url = format!("{}/files/{}", self.endpoints.upload_base, id);

        let response = self
            .send(|| {
                self.http
                    .patch(&url)
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
                    )
                    .body(body.clone())
            })
            .await?;
        let file: DriveFile = decode(response).await?;
        Ok(file.into_entry())
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/files/{}", self.endpoints.api_base, id);
        self.send(|| self.http.patch(&url).json(&json!({ "trashed": true })))
            .await?;
        Ok(())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<RemoteEntry> {
        let url = format!("{}/files", self.endpoints.api_base);
        let metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let response = self
            .send(|| {
                self.http
                    .post(&url)
                    .query(&[("fields", FILE_FIELDS)])
                    .json(&metadata)
            })
            .await?;
        let file: DriveFile = decode(response).await?;
        Ok(file.into_entry())
    }

    async fn ensure_root_folder(&self, name: &str) -> Result<RemoteEntry> {
        let query = format!(
            "{} in parents and trashed = false and mimeType = {} and name = {}",
            query_literal(DRIVE_ROOT_ALIAS),
            query_literal(FOLDER_MIME_TYPE),
            query_literal(name)
        );
        if let Some(existing) = self.list_query(&query).await?.into_iter().next() {
            debug!("Found existing root folder {} ({})", name, existing.id);
            return Ok(existing.into_entry());
        }

        info!("Creating root folder {} in Google Drive", name);
        self.create_folder(name, DRIVE_ROOT_ALIAS).await
    }
}
