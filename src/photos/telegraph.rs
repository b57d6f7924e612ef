//! Permanent image hosting and shareable pages on Telegraph.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

use crate::core::config;
use crate::core::error::{AppError, AppResult};

/// Moves a locally staged photo to permanent storage.
#[async_trait]
pub trait PhotoUploader: Send + Sync {
    /// Returns the permanent URL of the uploaded file.
    async fn upload(&self, path: &Path) -> AppResult<String>;
}

/// Publishes a page listing the photos of an appeal.
#[async_trait]
pub trait PageBuilder: Send + Sync {
    /// Returns the public URL of the created page.
    async fn create_page(&self, title: &str, image_urls: &[String]) -> AppResult<String>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UploadResponse {
    Files(Vec<UploadedFile>),
    Error { error: String },
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    src: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page {
    url: String,
}

pub struct TelegraphClient {
    http: Client,
    api_url: String,
    upload_url: String,
    access_token: String,
}

impl TelegraphClient {
    pub fn new(api_url: &str, upload_url: &str, access_token: &str) -> AppResult<Self> {
        let http = Client::builder()
            .connect_timeout(config::network::connect_timeout())
            .timeout(config::network::timeout())
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// Client configured from `TELEGRAPH_*` environment variables.
    pub fn from_env() -> AppResult<Self> {
        Self::new(
            &config::TELEGRAPH_URL,
            &config::TELEGRAPH_UPLOAD_URL,
            &config::TELEGRAPH_TOKEN,
        )
    }
}

#[async_trait]
impl PhotoUploader for TelegraphClient {
    async fn upload(&self, path: &Path) -> AppResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());
        let part = Part::bytes(bytes).file_name(file_name).mime_str("image/jpeg")?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/upload", self.upload_url))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::HttpStatus(response.status()));
        }

        match response.json::<UploadResponse>().await? {
            UploadResponse::Files(files) => files
                .into_iter()
                .next()
                .map(|file| format!("{}{}", self.upload_url, file.src))
                .ok_or_else(|| AppError::Validation("Telegraph upload returned no files".to_string())),
            UploadResponse::Error { error } => Err(AppError::Validation(format!("Telegraph upload: {}", error))),
        }
    }
}

#[async_trait]
impl PageBuilder for TelegraphClient {
    async fn create_page(&self, title: &str, image_urls: &[String]) -> AppResult<String> {
        let content: Vec<_> = image_urls
            .iter()
            .map(|url| json!({"tag": "img", "attrs": {"src": url}}))
            .collect();
        let body = json!({
            "access_token": self.access_token,
            "title": title,
            "content": content,
            "return_content": false,
        });

        let response = self
            .http
            .post(format!("{}/createPage", self.api_url))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::HttpStatus(response.status()));
        }

        let api: ApiResponse<Page> = response.json().await?;
        match (api.ok, api.result) {
            (true, Some(page)) => Ok(page.url),
            _ => Err(AppError::Validation(format!(
                "Telegraph createPage: {}",
                api.error.unwrap_or_else(|| "unknown error".to_string())
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> TelegraphClient {
        TelegraphClient::new(&server.uri(), &server.uri(), "token").unwrap()
    }

    #[tokio::test]
    async fn test_upload_returns_absolute_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"src": "/file/abc.jpg"}])))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("p.jpg");
        tokio::fs::write(&photo, b"jpeg").await.unwrap();

        let url = client(&server).await.upload(&photo).await.unwrap();
        assert_eq!(url, format!("{}/file/abc.jpg", server.uri()));
    }

    #[tokio::test]
    async fn test_upload_error_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "File type invalid"})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("p.jpg");
        tokio::fs::write(&photo, b"jpeg").await.unwrap();

        let err = client(&server).await.upload(&photo).await.unwrap_err();
        assert!(err.to_string().contains("File type invalid"));
    }

    #[tokio::test]
    async fn test_create_page_sends_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createPage"))
            .and(body_partial_json(json!({
                "access_token": "token",
                "title": "Evidence",
                "content": [{"tag": "img", "attrs": {"src": "http://img/1.jpg"}}]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": {"url": "https://telegra.ph/Evidence-01"}})),
            )
            .mount(&server)
            .await;

        let url = client(&server)
            .await
            .create_page("Evidence", &["http://img/1.jpg".to_string()])
            .await
            .unwrap();
        assert_eq!(url, "https://telegra.ph/Evidence-01");
    }

    #[tokio::test]
    async fn test_create_page_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createPage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "ACCESS_TOKEN_INVALID"})))
            .mount(&server)
            .await;

        let err = client(&server).await.create_page("t", &[]).await.unwrap_err();
        assert!(err.to_string().contains("ACCESS_TOKEN_INVALID"));
    }
}
