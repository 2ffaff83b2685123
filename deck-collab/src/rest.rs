//! REST client for the presentation API.
//!
//! Secondary path next to the hub: listing, creating and joining
//! presentations, saving the full slide set, adding slides, and changing a
//! role when the live channel is unavailable.

use deck_core::{Presentation, Role, Slide, User};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("No REST client configured")]
    NotConfigured,
    #[error("No presentation is open")]
    NoSession,
}

/// Response of the join endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedPresentation {
    #[serde(default)]
    pub presentation: Presentation,
    #[serde(default)]
    pub slides: Option<Vec<Slide>>,
    #[serde(default)]
    pub users: Option<Vec<User>>,
}

impl JoinedPresentation {
    /// Slides to open. A presentation with no slides gets one empty slide.
    pub fn slides_or_default(&self) -> Vec<Slide> {
        match &self.slides {
            Some(slides) if !slides.is_empty() => slides.clone(),
            _ => vec![Slide::new("1", 0)],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePresentation<'a> {
    name: &'a str,
    creator_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/Presentations{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(resp: Response) -> Result<Response, RestError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RestError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, RestError> {
        let resp = Self::check(builder.send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn list_presentations(&self) -> Result<Vec<Presentation>, RestError> {
        Self::send_json(self.request(Method::GET, "")).await
    }

    pub async fn create_presentation(&self, name: &str, creator_id: &str) -> Result<Presentation, RestError> {
        let body = CreatePresentation { name, creator_id };
        Self::send_json(self.request(Method::POST, "").json(&body)).await
    }

    pub async fn join_presentation(&self, presentation_id: &str, user_id: &str) -> Result<JoinedPresentation, RestError> {
        let path = format!("/{presentation_id}/join");
        Self::send_json(self.request(Method::POST, &path).json(&json!({ "userId": user_id }))).await
    }

    pub async fn save_slides(&self, presentation_id: &str, user_id: &str, slides: &[Slide]) -> Result<(), RestError> {
        let path = format!("/{presentation_id}/save");
        let builder = self
            .request(Method::POST, &path)
            .json(&json!({ "slides": slides, "userId": user_id }));
        Self::check(builder.send().await?).await?;
        Ok(())
    }

    pub async fn add_slide(&self, presentation_id: &str, user_id: &str, index: usize) -> Result<Slide, RestError> {
        let path = format!("/{presentation_id}/slides");
        Self::send_json(
            self.request(Method::POST, &path)
                .json(&json!({ "userId": user_id, "index": index })),
        )
        .await
    }

    pub async fn change_role(
        &self,
        presentation_id: &str,
        user_id: &str,
        role: Role,
        requester_id: &str,
    ) -> Result<(), RestError> {
        let path = format!("/{presentation_id}/users/{user_id}/role");
        let builder = self
            .request(Method::PUT, &path)
            .json(&json!({ "role": role, "requesterId": requester_id }));
        Self::check(builder.send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn one_shot_server(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut request = Vec::new();
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_joined_presentation_defaults() {
        let joined: JoinedPresentation =
            serde_json::from_str(r#"{"presentation":{"id":7,"name":"Deck"},"users":null}"#).unwrap();
        assert_eq!(joined.presentation.id, "7");
        assert!(joined.users.is_none());
        let slides = joined.slides_or_default();
        assert_eq!(slides.len(), 1);
        assert!(slides[0].content.is_empty());
    }

    #[tokio::test]
    async fn test_join_presentation() {
        let (base, server) = one_shot_server(
            "200 OK",
            r#"{"presentation":{"id":"p1","name":"Deck","creatorId":"u0"},"slides":[{"id":"s1","index":0,"content":[{"id":"t1","x":"5"}]}],"users":[{"id":"u1","nickname":"Ada","role":"editor"}]}"#,
        )
        .await;
        let client = RestClient::new(base, Some("tok".into()));
        let joined = client.join_presentation("p1", "u1").await.unwrap();

        assert_eq!(joined.presentation.creator_id, "u0");
        assert_eq!(joined.slides.unwrap()[0].content[0].x, 5);
        assert_eq!(joined.users.unwrap()[0].role, Role::Editor);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/Presentations/p1/join "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer tok"));
        assert!(request.contains(r#""userId":"u1""#));
    }

    #[tokio::test]
    async fn test_change_role_status_error() {
        let (base, server) = one_shot_server("403 Forbidden", r#"{"error":"nope"}"#).await;
        let client = RestClient::new(base, None);
        let err = client.change_role("p1", "u2", Role::Editor, "u1").await.unwrap_err();
        assert!(matches!(err, RestError::Status { status: 403, .. }));

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /api/Presentations/p1/users/u2/role "));
        assert!(request.contains(r#""role":"editor""#));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = RestClient::new(format!("http://{addr}/"), None);
        assert!(matches!(client.list_presentations().await, Err(RestError::Http(_))));
    }
}
