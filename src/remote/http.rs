use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    parse_timestamp, Document, RemoteEntry, RemoteError, RemoteResult, RemoteStore, RemoteTree,
    WriteConfirmation,
};

#[derive(Debug, Deserialize)]
struct FilesResponse {
    files: Vec<FileItem>,
}

#[derive(Debug, Deserialize)]
struct FileItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified: Option<String>,
    #[serde(default)]
    children: Option<Vec<FileItem>>,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    path: String,
    content: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutFileRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct PutFileResponse {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    count: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameRequest<'a> {
    old_path: &'a str,
    new_path: &'a str,
}

/// Client for the MDFlare document API.
///
/// Every request carries the bearer token and is bounded by the configured
/// timeout. All endpoints live under `{api_base}/api/{username}`.
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    username: String,
    token: String,
}

impl HttpRemote {
    pub fn new(
        api_base: &str,
        username: &str,
        token: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let base_url = Url::parse(api_base.trim_end_matches('/'))
            .with_context(|| format!("Invalid API base URL: {api_base}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry paths: {api_base}");
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mdflare-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            username: username.to_string(),
            token: token.to_string(),
        })
    }

    /// Build `{base}/api/{user}/{segments...}`, percent-encoding every segment.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("api")
                .push(&self.username)
                .extend(segments);
        }
        url
    }

    fn file_url(&self, path: &str) -> Url {
        self.endpoint(std::iter::once("file").chain(path.split('/')))
    }

    fn send(&self, request: RequestBuilder, subject: &str) -> RemoteResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(classify_status(status, subject, &body))
    }

    fn decode<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
        response.json::<T>().map_err(|e| {
            if e.is_timeout() {
                RemoteError::Transient(e.to_string())
            } else {
                RemoteError::Protocol(e.to_string())
            }
        })
    }
}

impl RemoteStore for HttpRemote {
    fn list(&self) -> RemoteResult<RemoteTree> {
        let url = self.endpoint(["files"]);
        let response = self.send(self.client.get(url), "files")?;
        let body: FilesResponse = Self::decode(response)?;

        let mut tree = RemoteTree::new();
        flatten_files(body.files, &mut tree);
        Ok(tree)
    }

    fn read(&self, path: &str) -> RemoteResult<Document> {
        let response = self.send(self.client.get(self.file_url(path)), path)?;
        let body: FileContent = Self::decode(response)?;

        if body.path != path {
            log::debug!("Server answered {} for requested {}", body.path, path);
        }

        Ok(Document {
            path: path.to_string(),
            size: body.size.unwrap_or(body.content.len() as u64),
            modified: parse_timestamp(body.modified.as_deref()),
            content: body.content,
        })
    }

    fn write(&self, path: &str, content: &str) -> RemoteResult<WriteConfirmation> {
        let request = self
            .client
            .put(self.file_url(path))
            .json(&PutFileRequest { content });
        let response = self.send(request, path)?;
        let body: PutFileResponse = Self::decode(response)?;

        Ok(WriteConfirmation {
            size: body.size.unwrap_or(content.len() as u64),
            modified: parse_timestamp(body.modified.as_deref()),
        })
    }

    fn delete(&self, path: &str, recursive: bool) -> RemoteResult<Option<u64>> {
        let mut url = self.file_url(path);
        if recursive {
            url.query_pairs_mut().append_pair("folder", "true");
        }
        let response = self.send(self.client.delete(url), path)?;
        let body: DeleteResponse = Self::decode(response)?;
        Ok(body.count)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> RemoteResult<Option<WriteConfirmation>> {
        let request = self.client.post(self.endpoint(["rename"])).json(&RenameRequest {
            old_path,
            new_path,
        });
        self.send(request, old_path)?;
        // The rename response carries no version stamp
        Ok(None)
    }
}

/// Flatten the nested listing into path → metadata, dropping folder markers.
fn flatten_files(items: Vec<FileItem>, tree: &mut RemoteTree) {
    for item in items {
        match item.kind.as_str() {
            "file" => tree.insert(
                item.path,
                RemoteEntry {
                    size: item.size,
                    modified: parse_timestamp(item.modified.as_deref()),
                },
            ),
            "folder" => {
                if let Some(children) = item.children {
                    flatten_files(children, tree);
                }
            }
            other => log::debug!("Skipping listing entry {} of type {other}", item.path),
        }
    }
}

/// Map a non-success HTTP status onto the remote failure classes.
fn classify_status(status: StatusCode, subject: &str, body: &str) -> RemoteError {
    let detail = if body.trim().is_empty() {
        format!("{subject}: HTTP {status}")
    } else {
        format!("{subject}: HTTP {status}: {}", body.trim())
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::AuthRequired(detail),
        StatusCode::NOT_FOUND => RemoteError::NotFound(subject.to_string()),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => RemoteError::Conflict(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Transient(detail)
        }
        s if s.is_server_error() => RemoteError::Transient(detail),
        s => RemoteError::Rejected {
            status: s.as_u16(),
            message: detail,
        },
    }
}

/// Map a transport-level failure (no HTTP status) onto the failure classes.
fn classify_transport(err: &reqwest::Error) -> RemoteError {
    if err.is_builder() {
        RemoteError::Protocol(err.to_string())
    } else if err.is_decode() {
        RemoteError::Protocol(err.to_string())
    } else {
        // timeouts, refused connections, resets, DNS failures
        RemoteError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn remote(base: &str) -> HttpRemote {
        HttpRemote::new(base, "alice", "secret", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn builds_endpoint_urls() {
        let api = remote("https://cloud.example.com/");
        assert_eq!(
            api.endpoint(["files"]).as_str(),
            "https://cloud.example.com/api/alice/files"
        );
        assert_eq!(
            api.file_url("notes/my note.md").as_str(),
            "https://cloud.example.com/api/alice/file/notes/my%20note.md"
        );
        assert_eq!(
            api.endpoint(["rename"]).as_str(),
            "https://cloud.example.com/api/alice/rename"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        let api = remote("http://localhost:7779/mdflare");
        assert_eq!(
            api.file_url("a.md").as_str(),
            "http://localhost:7779/mdflare/api/alice/file/a.md"
        );
    }

    #[test]
    fn rejects_invalid_base() {
        assert!(HttpRemote::new("not a url", "a", "t", Duration::from_secs(1)).is_err());
        assert!(HttpRemote::new("mailto:x@y", "a", "t", Duration::from_secs(1)).is_err());
    }

    #[rstest]
    #[case(401, "auth")]
    #[case(403, "auth")]
    #[case(404, "not_found")]
    #[case(409, "conflict")]
    #[case(412, "conflict")]
    #[case(408, "transient")]
    #[case(429, "transient")]
    #[case(500, "transient")]
    #[case(503, "transient")]
    #[case(400, "rejected")]
    #[case(413, "rejected")]
    fn classifies_status_codes(#[case] code: u16, #[case] expected: &str) {
        let status = StatusCode::from_u16(code).unwrap();
        let err = classify_status(status, "a.md", "");
        let kind = match err {
            RemoteError::AuthRequired(_) => "auth",
            RemoteError::NotFound(_) => "not_found",
            RemoteError::Conflict(_) => "conflict",
            RemoteError::Transient(_) => "transient",
            RemoteError::Rejected { .. } => "rejected",
            RemoteError::Protocol(_) => "protocol",
        };
        assert_eq!(kind, expected);
    }

    #[test]
    fn flattens_nested_listing() {
        let json = r#"{
            "user": "alice",
            "files": [
                {"name": "notes", "path": "notes", "type": "folder", "children": [
                    {"name": "a.md", "path": "notes/a.md", "type": "file", "size": 5,
                     "modified": "2025-01-01T00:00:00Z"},
                    {"name": "deep", "path": "notes/deep", "type": "folder", "children": [
                        {"name": "b.md", "path": "notes/deep/b.md", "type": "file"}
                    ]},
                    {"name": "empty", "path": "notes/empty", "type": "folder"}
                ]},
                {"name": "c.md", "path": "c.md", "type": "file", "size": 0}
            ]
        }"#;
        let body: FilesResponse = serde_json::from_str(json).unwrap();
        let mut tree = RemoteTree::new();
        flatten_files(body.files, &mut tree);

        let paths: Vec<_> = tree.paths().cloned().collect();
        assert_eq!(paths, vec!["c.md", "notes/a.md", "notes/deep/b.md"]);

        let a = tree.get("notes/a.md").unwrap();
        assert_eq!(a.size, Some(5));
        assert!(a.modified.is_some());
        assert_eq!(tree.get("notes/deep/b.md").unwrap().modified, None);
    }

    #[test]
    fn rename_request_uses_camel_case() {
        let body = serde_json::to_value(RenameRequest {
            old_path: "a.md",
            new_path: "b/a.md",
        })
        .unwrap();
        assert_eq!(body["oldPath"], "a.md");
        assert_eq!(body["newPath"], "b/a.md");
    }

    #[test]
    fn unreachable_server_is_transient() {
        // Port 9 (discard) on localhost is almost never listening
        let api = HttpRemote::new("http://127.0.0.1:9", "a", "t", Duration::from_secs(2)).unwrap();
        match api.list() {
            Err(RemoteError::Transient(_)) => {}
            other => panic!("expected transient failure, got {other:?}"),
        }
    }
}
