//! Catch-all static file service with HTML directory listings

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

const INDEX_FILE: &str = "index.html";

/// Serves files below `root`; every path is handled by a single fallback route
#[derive(Clone, Debug)]
pub struct FileServer {
    root: Arc<PathBuf>,
}

impl FileServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn into_router(self) -> Router {
        Router::new().fallback(serve_path).with_state(self)
    }
}

/// Turn a request path into a relative file system path, rejecting traversal
fn relative_path(uri_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(uri_path).ok()?;
    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => relative.push(s),
        }
    }
    Some(relative)
}

fn error_response(error: &io::Error) -> Response {
    match error.kind() {
        io::ErrorKind::NotFound => (StatusCode::NOT_FOUND, "404 page not found").into_response(),
        io::ErrorKind::PermissionDenied => (StatusCode::FORBIDDEN, "403 Forbidden").into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error").into_response(),
    }
}

async fn serve_path(State(files): State<FileServer>, request: Request) -> Response {
    let uri_path = request.uri().path().to_string();
    let Some(relative) = relative_path(&uri_path) else {
        debug!(path = %uri_path, "Rejected path outside of the served directory");
        return error_response(&io::ErrorKind::NotFound.into());
    };
    let target = files.root.join(relative);

    let metadata = match tokio::fs::metadata(&target).await {
        Ok(metadata) => metadata,
        Err(e) => return error_response(&e),
    };

    if !metadata.is_dir() {
        return serve_file(target, request).await;
    }

    if !uri_path.ends_with('/') {
        let location = match request.uri().query() {
            Some(query) => format!("{uri_path}/?{query}"),
            None => format!("{uri_path}/"),
        };
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response();
    }

    let index = target.join(INDEX_FILE);
    if tokio::fs::metadata(&index)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
    {
        return serve_file(index, request).await;
    }

    match directory_listing(&target).await {
        Ok(html) => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn serve_file(path: PathBuf, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

/// HTML `<pre>` listing, sorted by name, directories suffixed with `/`
pub async fn directory_listing(dir: &Path) -> io::Result<String> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await?.is_dir();
        if is_dir {
            name.push('/');
        }
        entries.push((name, is_dir));
    }
    entries.sort();

    let mut html = String::from(
        "<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n",
    );
    for (name, is_dir) in entries {
        let bare = name.trim_end_matches('/');
        let mut href = urlencoding::encode(bare).into_owned();
        if is_dir {
            href.push('/');
        }
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            href,
            escape_html(&name)
        ));
    }
    html.push_str("</pre>\n");
    Ok(html)
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use rstest::rstest;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("a b.txt"), "spaced").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs").join("index.html"), "<h1>docs</h1>").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        dir
    }

    async fn get(dir: &TempDir, uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = FileServer::new(dir.path())
            .into_router()
            .oneshot(HttpRequest::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8_lossy(&body).into_owned())
    }

    #[rstest]
    #[case("/", Some(""))]
    #[case("/docs/index.html", Some("docs/index.html"))]
    #[case("/a%20b.txt", Some("a b.txt"))]
    #[case("/./docs//x", Some("docs/x"))]
    #[case("/../etc/passwd", None)]
    #[case("/docs/%2e%2e/%2e%2e/secret", None)]
    fn test_relative_path(#[case] uri: &str, #[case] expected: Option<&str>) {
        assert_eq!(relative_path(uri), expected.map(PathBuf::from));
    }

    #[tokio::test]
    async fn test_serves_file_with_type_and_length() {
        let dir = fixture();
        let (status, headers, body) = get(&dir, "/hello.txt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello");
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "5");
        assert!(headers
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_root_listing() {
        let dir = fixture();
        let (status, headers, body) = get(&dir, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );
        assert!(body.contains("<a href=\"a%20b.txt\">a b.txt</a>"));
        assert!(body.contains("<a href=\"docs/\">docs/</a>"));
        assert!(body.contains("<a href=\"hello.txt\">hello.txt</a>"));
        let a = body.find("a%20b.txt").unwrap();
        let h = body.find("hello.txt").unwrap();
        assert!(a < h);
    }

    #[tokio::test]
    async fn test_directory_redirect_and_index() {
        let dir = fixture();
        let (status, headers, _) = get(&dir, "/docs?x=1").await;
        assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(headers.get(header::LOCATION).unwrap(), "/docs/?x=1");

        let (status, _, body) = get(&dir, "/docs/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>docs</h1>");
    }

    #[tokio::test]
    async fn test_empty_directory_listing() {
        let dir = fixture();
        let (status, _, body) = get(&dir, "/empty/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<pre>\n</pre>"));
    }

    #[tokio::test]
    async fn test_missing_and_traversal_are_not_found() {
        let dir = fixture();
        let (status, _, body) = get(&dir, "/nope.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "404 page not found");

        let (status, _, _) = get(&dir, "/../hello.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a&b>\"'"), "&lt;a&amp;b&gt;&#34;&#39;");
    }
}
