use anyhow::Result;
use ledgerbridge::{ListQuery, RemoteCatalog, ServerConfig};
use ledgerbridge_api::{Order, RemoteId, SyncError};
use ledgerbridge_woocommerce::WooCommerceCatalog;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves canned responses, one per connection, and records each raw request.
struct CannedServer {
    url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    async fn start(responses: Vec<(u16, &'static str)>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        Ok(Self { url, requests })
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let Ok(n) = socket.read(&mut chunk).await else {
            break;
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn catalog(server: &CannedServer) -> Result<WooCommerceCatalog> {
    let mut config = ServerConfig::new(&server.url);
    config.consumer_key = "ck_test".into();
    config.consumer_secret = "cs_test".into();
    Ok(WooCommerceCatalog::new(&config, Duration::from_secs(5))?)
}

#[tokio::test]
async fn test_list_products_sends_auth_and_paging() -> Result<()> {
    let server = CannedServer::start(vec![(
        200,
        r#"[{"id": 17, "name": "Widget", "type": "simple", "date_modified_gmt": "2024-03-02T11:30:15"}]"#,
    )])
    .await?;
    let catalog = catalog(&server)?;

    let products = catalog
        .list_products(&ListQuery::default().with_page_size(25))
        .await?;
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].id, RemoteId(17));
    assert_eq!(&products[0].server, catalog.server());

    let requests = server.requests();
    let request = &requests[0];
    assert!(request.starts_with("GET /wp-json/wc/v3/products?page=1&per_page=25"));
    // base64("ck_test:cs_test")
    assert!(request.contains("Y2tfdGVzdDpjc190ZXN0"));
    Ok(())
}

#[tokio::test]
async fn test_missing_record_is_an_empty_listing() -> Result<()> {
    let server = CannedServer::start(vec![(404, r#"{"code": "woocommerce_rest_shop_order_invalid_id"}"#)]).await?;
    let catalog = catalog(&server)?;

    let orders = catalog.list_orders(&ListQuery::by_id(RemoteId(99))).await?;
    assert!(orders.is_empty());
    assert!(server.requests()[0].starts_with("GET /wp-json/wc/v3/orders/99 "));
    Ok(())
}

#[tokio::test]
async fn test_server_errors_are_retryable_and_truncated() -> Result<()> {
    let body: &'static str = Box::leak("x".repeat(2000).into_boxed_str());
    let server = CannedServer::start(vec![(503, body)]).await?;
    let catalog = catalog(&server)?;

    let err = catalog.list_products(&ListQuery::default()).await.unwrap_err();
    assert!(err.is_retryable());
    let message = err.to_string();
    assert!(message.contains("HTTP 503"));
    assert!(message.ends_with("... (truncated)"));
    Ok(())
}

#[tokio::test]
async fn test_rejected_payload_is_not_retryable() -> Result<()> {
    let server = CannedServer::start(vec![(
        400,
        r#"{"code": "rest_invalid_param", "message": "Invalid parameter(s): line_items"}"#,
    )])
    .await?;
    let catalog = catalog(&server)?;

    let order = Order::draft(catalog.server().clone(), "pending");
    let err = catalog.create_order(&order).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput { .. }));
    assert!(!err.is_retryable());

    let request = &server.requests()[0];
    assert!(request.starts_with("POST /wp-json/wc/v3/orders "));
    assert!(request.contains(r#""status":"pending""#));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_is_retryable() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);
    drop(listener);

    let catalog = WooCommerceCatalog::new(&ServerConfig::new(&url), Duration::from_secs(2))?;
    let err = catalog.list_orders(&ListQuery::default()).await.unwrap_err();
    assert!(err.is_retryable());
    Ok(())
}
