use crate::{BucketAttrs, RemoteError, StorageClient};
use serde::Deserialize;
use std::io::Read;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Source of the bearer token sent with every storage request.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<String, RemoteError>;
}

/// A fixed token, or no `Authorization` header at all when empty.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn token(&self) -> Result<String, RemoteError> {
        Ok(self.0.clone())
    }
}

/// Google Cloud Storage JSON API client.
///
/// Uses:
/// - `GET    /storage/v1/b/<bucket>`            — bucket attributes
/// - `POST   /storage/v1/b?project=<project>`   — create bucket
/// - `GET    /storage/v1/b/<bucket>/o`          — list objects (paginated)
/// - `DELETE /storage/v1/b/<bucket>/o/<object>` — delete object
/// - `DELETE /storage/v1/b/<bucket>`            — delete empty bucket
pub struct GcsClient {
    endpoint: String,
    agent: ureq::Agent,
    tokens: Box<dyn TokenProvider>,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

impl GcsClient {
    pub fn new(endpoint: &str, tokens: Box<dyn TokenProvider>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            agent: ureq::Agent::new_with_defaults(),
            tokens,
        }
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}", self.endpoint, encode_component(bucket))
    }

    fn bearer(&self) -> Result<Option<String>, RemoteError> {
        let token = self.tokens.token()?;
        Ok((!token.is_empty()).then(|| format!("Bearer {token}")))
    }

    fn classify(err: ureq::Error, url: &str) -> RemoteError {
        match err {
            ureq::Error::StatusCode(404) => RemoteError::NotFound(url.to_owned()),
            ureq::Error::StatusCode(401 | 403) => RemoteError::Forbidden(url.to_owned()),
            ureq::Error::StatusCode(409) => RemoteError::Conflict(url.to_owned()),
            ureq::Error::StatusCode(code) => RemoteError::Status {
                code,
                url: url.to_owned(),
            },
            other => RemoteError::Http(other.to_string()),
        }
    }

    fn do_get(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let mut req = self.agent.get(url);
        if let Some(auth) = self.bearer()? {
            req = req.header("Authorization", &auth);
        }
        let resp = req.call().map_err(|e| Self::classify(e, url))?;
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(body)
    }

    fn do_post_json(&self, url: &str, data: &[u8]) -> Result<(), RemoteError> {
        let mut req = self
            .agent
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(auth) = self.bearer()? {
            req = req.header("Authorization", &auth);
        }
        req.send(data).map_err(|e| Self::classify(e, url))?;
        Ok(())
    }

    fn do_delete(&self, url: &str) -> Result<(), RemoteError> {
        let mut req = self.agent.delete(url);
        if let Some(auth) = self.bearer()? {
            req = req.header("Authorization", &auth);
        }
        req.call().map_err(|e| Self::classify(e, url))?;
        Ok(())
    }
}

impl StorageClient for GcsClient {
    fn bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, RemoteError> {
        let url = self.bucket_url(bucket);
        debug!("GET {url}");
        let body = self.do_get(&url)?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))
    }

    fn create_bucket(
        &self,
        project: &str,
        bucket: &str,
        location: &str,
    ) -> Result<(), RemoteError> {
        let url = format!(
            "{}/storage/v1/b?project={}",
            self.endpoint,
            encode_component(project)
        );
        debug!("POST {url}");
        let payload = serde_json::json!({ "name": bucket, "location": location });
        let data =
            serde_json::to_vec(&payload).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        self.do_post_json(&url, &data)
    }

    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, RemoteError> {
        let base = format!("{}/o?fields=items(name),nextPageToken", self.bucket_url(bucket));
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{base}&pageToken={}", encode_component(token)),
                None => base.clone(),
            };
            debug!("GET {url}");
            let body = self.do_get(&url)?;
            let page: ObjectList = serde_json::from_slice(&body)
                .map_err(|e| RemoteError::Serialization(e.to_string()))?;
            names.extend(page.items.into_iter().map(|i| i.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(names),
            }
        }
    }

    fn delete_object(&self, bucket: &str, object: &str) -> Result<(), RemoteError> {
        let url = format!("{}/o/{}", self.bucket_url(bucket), encode_component(object));
        debug!("DELETE {url}");
        self.do_delete(&url)
    }

    fn delete_bucket(&self, bucket: &str) -> Result<(), RemoteError> {
        let url = self.bucket_url(bucket);
        debug!("DELETE {url}");
        self.do_delete(&url)
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set, so object
/// names containing `/` stay a single path segment.
fn encode_component(raw: &str) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BucketError, StateBucketManager};
    use std::collections::{BTreeMap, HashMap};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
    }

    type Buckets = Arc<Mutex<BTreeMap<String, Vec<String>>>>;
    type Faults = Arc<Mutex<Vec<(String, u16)>>>;

    /// Minimal GCS JSON API emulator. Object listings are paged two at a time.
    /// Requests whose path contains a registered fragment get that status.
    struct MockGcs {
        addr: String,
        buckets: Buckets,
        faults: Faults,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
        _handle: std::thread::JoinHandle<()>,
    }

    impl MockGcs {
        fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let buckets: Buckets = Arc::new(Mutex::new(BTreeMap::new()));
            let requests = Arc::new(Mutex::new(Vec::new()));
            let faults: Faults = Arc::new(Mutex::new(Vec::new()));

            let faults_clone = Arc::clone(&faults);
            let buckets_clone = Arc::clone(&buckets);
            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).is_err() {
                        continue;
                    }
                    let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                    if parts.len() < 2 {
                        continue;
                    }
                    let method = parts[0].to_owned();
                    let path = parts[1].to_owned();

                    let mut headers = HashMap::new();
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                            break;
                        }
                        if let Some((k, v)) = line.trim().split_once(": ") {
                            headers.insert(k.to_lowercase(), v.to_owned());
                        }
                    }
                    let content_length: usize = headers
                        .get("content-length")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    let mut body = vec![0u8; content_length];
                    if content_length > 0 {
                        let _ = std::io::Read::read_exact(&mut reader, &mut body);
                    }

                    requests_clone.lock().unwrap().push(CapturedRequest {
                        method: method.clone(),
                        path: path.clone(),
                        headers,
                    });

                    let fault = faults_clone
                        .lock()
                        .unwrap()
                        .iter()
                        .find(|(fragment, _)| path.contains(fragment.as_str()))
                        .map(|&(_, status)| status);
                    let (status, payload) = match fault {
                        Some(status) => (status, "{}".to_owned()),
                        None => handle_request(&buckets_clone, &method, &path, &body),
                    };
                    let reason = match status {
                        200 => "OK",
                        204 => "No Content",
                        401 => "Unauthorized",
                        403 => "Forbidden",
                        404 => "Not Found",
                        409 => "Conflict",
                        429 => "Too Many Requests",
                        503 => "Service Unavailable",
                        _ => "Error",
                    };
                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                        payload.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                    let _ = stream.flush();
                }
            });

            MockGcs {
                addr,
                buckets,
                faults,
                requests,
                _handle: handle,
            }
        }

        fn seed(&self, bucket: &str, objects: &[&str]) {
            self.buckets.lock().unwrap().insert(
                bucket.to_owned(),
                objects.iter().map(|&o| o.to_owned()).collect(),
            );
        }

        fn fail_path(&self, fragment: &str, status: u16) {
            self.faults
                .lock()
                .unwrap()
                .push((fragment.to_owned(), status));
        }

        fn requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn decode(raw: &str) -> String {
        let bytes = raw.as_bytes();
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' && i + 2 < bytes.len() {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap();
                out.push(u8::from_str_radix(hex, 16).unwrap());
                i += 3;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        String::from_utf8(out).unwrap()
    }

    fn handle_request(buckets: &Buckets, method: &str, path: &str, body: &[u8]) -> (u16, String) {
        let mut buckets = buckets.lock().unwrap();
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let segments: Vec<&str> = path
            .trim_start_matches("/storage/v1/b")
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        match (method, segments.as_slice()) {
            ("POST", []) => {
                let req: serde_json::Value = serde_json::from_slice(body).unwrap();
                let name = req["name"].as_str().unwrap().to_owned();
                if buckets.contains_key(&name) {
                    return (409, "{}".to_owned());
                }
                buckets.insert(name.clone(), Vec::new());
                (200, serde_json::json!({ "name": name }).to_string())
            }
            ("GET", [bucket]) => match buckets.get(&decode(bucket)) {
                Some(_) => (
                    200,
                    serde_json::json!({
                        "name": decode(bucket),
                        "location": "ME-WEST1",
                        "projectNumber": "123456"
                    })
                    .to_string(),
                ),
                None => (404, "{}".to_owned()),
            },
            ("DELETE", [bucket]) => match buckets.get(&decode(bucket)) {
                Some(objects) if !objects.is_empty() => (409, "{}".to_owned()),
                Some(_) => {
                    buckets.remove(&decode(bucket));
                    (204, String::new())
                }
                None => (404, "{}".to_owned()),
            },
            ("GET", [bucket, "o"]) => {
                let Some(objects) = buckets.get(&decode(bucket)) else {
                    return (404, "{}".to_owned());
                };
                let start: usize = query
                    .split('&')
                    .find_map(|kv| kv.strip_prefix("pageToken="))
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(0);
                let page: Vec<_> = objects
                    .iter()
                    .skip(start)
                    .take(2)
                    .map(|n| serde_json::json!({ "name": n }))
                    .collect();
                let mut resp = serde_json::json!({ "items": page });
                if start + 2 < objects.len() {
                    resp["nextPageToken"] = serde_json::json!((start + 2).to_string());
                }
                (200, resp.to_string())
            }
            ("DELETE", [bucket, "o", object]) => {
                let Some(objects) = buckets.get_mut(&decode(bucket)) else {
                    return (404, "{}".to_owned());
                };
                let name = decode(object);
                match objects.iter().position(|o| *o == name) {
                    Some(idx) => {
                        objects.remove(idx);
                        (204, String::new())
                    }
                    None => (404, "{}".to_owned()),
                }
            }
            _ => (400, "{}".to_owned()),
        }
    }

    fn client(server: &MockGcs) -> GcsClient {
        GcsClient::new(&server.addr, Box::new(StaticToken("tok-1".to_owned())))
    }

    #[test]
    fn create_then_fetch_attrs() {
        let server = MockGcs::start();
        let gcs = client(&server);

        assert!(matches!(
            gcs.bucket_attrs("acme-tfstate"),
            Err(RemoteError::NotFound(_))
        ));
        gcs.create_bucket("acme", "acme-tfstate", "me-west1").unwrap();
        let attrs = gcs.bucket_attrs("acme-tfstate").unwrap();
        assert_eq!(attrs.name, "acme-tfstate");
        assert_eq!(attrs.project_number.as_deref(), Some("123456"));

        let reqs = server.requests();
        let post = reqs.iter().find(|r| r.method == "POST").unwrap();
        assert_eq!(post.path, "/storage/v1/b?project=acme");
    }

    #[test]
    fn duplicate_create_is_conflict() {
        let server = MockGcs::start();
        server.seed("taken", &[]);
        let err = client(&server)
            .create_bucket("acme", "taken", "me-west1")
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }

    #[test]
    fn auth_failures_are_forbidden() {
        let server = MockGcs::start();
        server.fail_path("/b/locked", 403);
        server.fail_path("/b/expired", 401);
        let gcs = client(&server);

        for bucket in ["locked", "expired"] {
            let err = gcs.bucket_attrs(bucket).unwrap_err();
            assert!(matches!(err, RemoteError::Forbidden(_)), "{bucket}: {err}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        let server = MockGcs::start();
        server.fail_path("/b/throttled", 429);
        server.fail_path("/b/broken", 500);
        server.fail_path("/b/down", 503);
        server.fail_path("/b/malformed", 400);
        let gcs = client(&server);

        for (bucket, code) in [("throttled", 429), ("broken", 500), ("down", 503)] {
            let err = gcs.bucket_attrs(bucket).unwrap_err();
            assert!(
                matches!(err, RemoteError::Status { code: c, .. } if c == code),
                "{bucket}: {err}"
            );
            assert!(err.is_transient(), "{bucket}");
        }
        let err = gcs.bucket_attrs("malformed").unwrap_err();
        assert!(matches!(err, RemoteError::Status { code: 400, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn manager_separates_conflict_from_transient() {
        let server = MockGcs::start();
        server.seed("taken-elsewhere", &[]);
        server.fail_path("/b/taken-elsewhere", 403);
        server.fail_path("project=flaky", 503);
        let manager = StateBucketManager::new(Arc::new(client(&server)));

        let err = manager.ensure("p1", "taken-elsewhere").unwrap_err();
        assert!(matches!(err, BucketError::Conflict { .. }), "{err}");

        let err = manager.ensure("flaky", "flaky-tfstate").unwrap_err();
        match err {
            BucketError::Transient { source, .. } => assert!(source.is_transient()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!server.buckets.lock().unwrap().contains_key("flaky-tfstate"));
    }

    #[test]
    fn purge_walks_every_page_before_bucket_delete() {
        let server = MockGcs::start();
        server.seed(
            "state",
            &["terraform/state/default.tfstate", "a", "b", "c", "d"],
        );
        let manager = StateBucketManager::new(Arc::new(client(&server)));

        assert_eq!(manager.delete("acme", "state").unwrap(), 5);
        assert!(server.buckets.lock().unwrap().is_empty());

        let reqs = server.requests();
        let lists = reqs
            .iter()
            .filter(|r| r.method == "GET" && r.path.contains("/o?"))
            .count();
        assert_eq!(lists, 3);
        let object_deletes = reqs
            .iter()
            .filter(|r| r.method == "DELETE" && r.path.contains("/o/"))
            .count();
        assert_eq!(object_deletes, 5);
        let last = reqs.last().unwrap();
        assert_eq!(last.method, "DELETE");
        assert_eq!(last.path, "/storage/v1/b/state");
    }

    #[test]
    fn purge_stops_at_failing_object_on_later_page() {
        let server = MockGcs::start();
        server.seed("state", &["a", "b", "c", "x", "e"]);
        server.fail_path("/o/x", 500);
        let manager = StateBucketManager::new(Arc::new(client(&server)));

        let err = manager.delete("acme", "state").unwrap_err();
        assert_eq!(err.failing_object(), Some("x"));
        match err {
            BucketError::ObjectDelete { source, .. } => assert!(source.is_transient()),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.buckets.lock().unwrap()["state"], vec!["x", "e"]);
        assert!(!server
            .requests()
            .iter()
            .any(|r| r.method == "DELETE" && r.path == "/storage/v1/b/state"));
    }

    #[test]
    fn list_follows_pagination() {
        let server = MockGcs::start();
        server.seed(
            "state",
            &["terraform/state/default.tfstate", "a", "b", "c", "d"],
        );
        let names = client(&server).list_objects("state").unwrap();
        assert_eq!(names.len(), 5);
        assert_eq!(names[0], "terraform/state/default.tfstate");

        let lists = server
            .requests()
            .into_iter()
            .filter(|r| r.method == "GET" && r.path.contains("/o?"))
            .count();
        assert_eq!(lists, 3);
    }

    #[test]
    fn delete_object_encodes_slashes() {
        let server = MockGcs::start();
        server.seed("state", &["terraform/state/default.tfstate"]);
        let gcs = client(&server);
        gcs.delete_object("state", "terraform/state/default.tfstate")
            .unwrap();
        gcs.delete_bucket("state").unwrap();

        let reqs = server.requests();
        assert!(reqs
            .iter()
            .any(|r| r.path == "/storage/v1/b/state/o/terraform%2Fstate%2Fdefault.tfstate"));
        assert!(server.buckets.lock().unwrap().is_empty());
    }

    #[test]
    fn bearer_token_is_sent() {
        let server = MockGcs::start();
        let _ = client(&server).bucket_attrs("any");
        let reqs = server.requests();
        assert_eq!(
            reqs[0].headers.get("authorization"),
            Some(&"Bearer tok-1".to_owned())
        );
    }

    #[test]
    fn empty_token_sends_no_header() {
        let server = MockGcs::start();
        let gcs = GcsClient::new(&server.addr, Box::new(StaticToken::default()));
        let _ = gcs.bucket_attrs("any");
        assert!(!server.requests()[0].headers.contains_key("authorization"));
    }

    #[test]
    fn connection_refused_is_http_error() {
        let gcs = GcsClient::new("http://127.0.0.1:1", Box::new(StaticToken::default()));
        assert!(matches!(gcs.bucket_attrs("x"), Err(RemoteError::Http(_))));
    }

    #[test]
    fn encode_component_keeps_unreserved() {
        assert_eq!(encode_component("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(encode_component("a/b c"), "a%2Fb%20c");
    }
}
