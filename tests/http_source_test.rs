//! HTTP statement source against a local stub server.

use secrecy::SecretString;
use statement_ingest::error::FetchError;
use statement_ingest::model::StatementKind;
use statement_ingest::source::{HttpStatementSource, StatementSource};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Canned `(path, status, body)` responses; unknown paths get a 404.
type Routes = Vec<(String, u16, String)>;

struct Stub {
    base_url: String,
    /// Raw request heads, lowercased.
    requests: Arc<Mutex<Vec<String>>>,
}

impl Stub {
    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn stub(routes: &[(&str, u16, &str)]) -> Stub {
    let routes: Arc<Routes> = Arc::new(
        routes
            .iter()
            .map(|(path, status, body)| (path.to_string(), *status, body.to_string()))
            .collect(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let routes = Arc::clone(&routes);
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&head).to_lowercase();
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                seen.lock().unwrap().push(head);

                let (status, body) = routes
                    .iter()
                    .find(|(p, _, _)| p.to_lowercase() == path)
                    .map(|(_, status, body)| (*status, body.clone()))
                    .unwrap_or((404, String::new()));
                let response = format!(
                    "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Stub { base_url, requests }
}

const ROWS: &str = r#"[{"REPORT_DATE": "2023-12-31 00:00:00", "TOTAL_ASSETS": 100.5}]"#;

async fn fetch_status(status: u16) -> Result<usize, FetchError> {
    let server = stub(&[("/statements/balance_sheet/SH600519", status, "{}")]).await;
    let source = HttpStatementSource::new(&server.base_url, None).unwrap();
    source
        .fetch_kind("SH600519", StatementKind::BalanceSheet)
        .await
        .map(|records| records.len())
}

// ---------------------------------------------------------------------------
// Status classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_found_is_an_empty_kind() {
    assert_eq!(fetch_status(404).await, Ok(0));
}

#[tokio::test]
async fn throttling_and_server_errors_are_transient() {
    for status in [429, 500, 502, 503] {
        let err = fetch_status(status).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)), "{status}: {err}");
        assert!(err.is_retryable());
    }
}

#[tokio::test]
async fn other_client_errors_are_permanent() {
    for status in [400, 401, 403, 422] {
        let err = fetch_status(status).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)), "{status}: {err}");
        assert!(!err.is_retryable());
    }
}

#[tokio::test]
async fn malformed_body_is_permanent() {
    let server = stub(&[("/statements/income_statement/SH600519", 200, "{not json")]).await;
    let source = HttpStatementSource::new(&server.base_url, None).unwrap();

    let err = source
        .fetch_kind("SH600519", StatementKind::IncomeStatement)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Permanent(_)), "{err}");
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let source = HttpStatementSource::new(base_url, None).unwrap();

    let err = source
        .fetch_kind("SH600519", StatementKind::BalanceSheet)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transient(_)), "{err}");
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_combines_every_statement_kind() {
    let server = stub(&[
        ("/statements/balance_sheet/SH600519", 200, ROWS),
        ("/statements/cash_flow_statement/SH600519", 200, ROWS),
    ])
    .await;
    let source = HttpStatementSource::new(&server.base_url, None).unwrap();

    let records = source.fetch("SH600519").await.unwrap();

    let kinds: Vec<StatementKind> = records.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![StatementKind::BalanceSheet, StatementKind::CashFlowStatement]
    );
    assert_eq!(records[0].items["TOTAL_ASSETS"], 100.5);
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn token_is_sent_as_bearer_auth() {
    let server = stub(&[("/statements/balance_sheet/SH600519", 200, ROWS)]).await;
    let token = SecretString::from("t0ken".to_string());
    let source = HttpStatementSource::new(&server.base_url, Some(token)).unwrap();

    source
        .fetch_kind("SH600519", StatementKind::BalanceSheet)
        .await
        .unwrap();

    let requests = server.requests();
    assert!(requests[0].contains("authorization: bearer t0ken"));
}

#[tokio::test]
async fn request_delay_precedes_every_request() {
    let server = stub(&[]).await;
    let source = HttpStatementSource::new(&server.base_url, None)
        .unwrap()
        .with_request_delay(Duration::from_millis(100));

    let started = Instant::now();
    source.fetch("SH600519").await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn list_codes_reads_the_listing() {
    let server = stub(&[(
        "/codes",
        200,
        r#"[{"code": "600519", "name": "Kweichow Moutai"}, {"code": "000001"}]"#,
    )])
    .await;
    let source = HttpStatementSource::new(&server.base_url, None).unwrap();

    let listings = source.list_codes().await.unwrap();

    assert_eq!(listings.len(), 2);
    assert_eq!(listings[0].code, "600519");
    assert_eq!(listings[1].name, "");
}
