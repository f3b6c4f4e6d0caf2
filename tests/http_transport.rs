use espac_config::{
    config::DeviceConfig,
    device_transport::{Attachment, DeviceTransport, FirmwareImage, HttpDeviceTransport},
    error::TransportError,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::mpsc,
    task::JoinHandle,
};

const FIXTURE: &str = "00dc0546656c757808596f7572574946490b596f7572506173736b65790566656c75780c3139322e3136382e302e313007382e382e382e340b3139322e3136382e302e310d3235352e3235352e3235352e30";

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

enum Reply {
    Status(u16, &'static str),
    /// Close the connection without answering, like a device that resets.
    Hangup,
}

type Handler = Arc<dyn Fn(&Request) -> Reply + Send + Sync>;

struct FakeDevice {
    url: String,
    requests: mpsc::UnboundedReceiver<Request>,
    server: JoinHandle<()>,
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// Integration tests for HttpDeviceTransport
async fn start_fake_device(handler: impl Fn(&Request) -> Reply + Send + Sync + 'static) -> FakeDevice {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind fake device");
    let url = format!("http://{}", listener.local_addr().expect("no local address"));
    let handler: Handler = Arc::new(handler);
    let (requests_tx, requests) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let handler = Arc::clone(&handler);
            let requests_tx = requests_tx.clone();

            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.is_err() {
                    return;
                }
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                // Read HTTP headers
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.is_err() {
                        return;
                    }
                    if line.trim().is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap_or(0);
                        }
                    }
                }

                let mut body = vec![0; content_length];
                if reader.read_exact(&mut body).await.is_err() {
                    return;
                }

                let request = Request { method, path, body };
                let reply = handler(&request);
                let _ = requests_tx.send(request);

                match reply {
                    Reply::Status(status, body) => {
                        let http_response = format!(
                            "HTTP/1.1 {status} Fake\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = write_half.write_all(http_response.as_bytes()).await;
                        let _ = write_half.shutdown().await;
                    }
                    Reply::Hangup => {}
                }
            });
        }
    });

    FakeDevice {
        url,
        requests,
        server,
    }
}

fn transport_for(device: &FakeDevice) -> HttpDeviceTransport {
    HttpDeviceTransport::new(&DeviceConfig {
        url: device.url.clone(),
        request_timeout: Duration::from_secs(2),
        upload_timeout: Duration::from_secs(2),
    })
    .expect("failed to create transport")
}

#[tokio::test]
async fn fetch_config_returns_stored_payload() {
    let mut device = start_fake_device(|request| match request.path.as_str() {
        "/config.dat" => Reply::Status(200, FIXTURE),
        _ => Reply::Status(404, "not found"),
    })
    .await;

    let payload = transport_for(&device)
        .fetch_config()
        .await
        .expect("failed to fetch config");
    assert_eq!(payload, FIXTURE);

    let request = device.requests.recv().await.expect("no request recorded");
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/config.dat");
}

#[tokio::test]
async fn missing_config_is_a_status_error() {
    let device = start_fake_device(|_| Reply::Status(404, "not found")).await;

    let result = transport_for(&device).fetch_config().await;
    assert!(matches!(result, Err(TransportError::Status { status: 404 })));
}

#[tokio::test]
async fn hangup_is_a_connection_error() {
    let device = start_fake_device(|_| Reply::Hangup).await;
    let transport = transport_for(&device);

    let result = transport
        .push_config("000f0000000000000000".to_string(), vec![])
        .await;
    let err = result.expect_err("push to a resetting device must fail");
    assert!(err.is_connection(), "unexpected error: {err}");
}

#[tokio::test]
async fn unreachable_device_is_a_connection_error() {
    // bind and release a port so nothing is listening on it
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("no local address");
    drop(listener);

    let transport = HttpDeviceTransport::new(&DeviceConfig {
        url: format!("http://{addr}"),
        request_timeout: Duration::from_secs(2),
        upload_timeout: Duration::from_secs(2),
    })
    .expect("failed to create transport");

    let err = transport.ping().await.expect_err("ping must fail");
    assert!(err.is_connection(), "unexpected error: {err}");
}

#[tokio::test]
async fn ping_hits_liveness_endpoint() {
    let mut device = start_fake_device(|request| match request.path.as_str() {
        "/config/ping" => Reply::Status(200, "pong"),
        _ => Reply::Status(404, "not found"),
    })
    .await;

    transport_for(&device).ping().await.expect("ping failed");

    let request = device.requests.recv().await.expect("no request recorded");
    assert_eq!(request.path, "/config/ping");
}

#[tokio::test]
async fn push_config_posts_multipart_form() {
    let mut device = start_fake_device(|_| Reply::Status(200, "OK")).await;

    transport_for(&device)
        .push_config(
            FIXTURE.to_string(),
            vec![Attachment::new("ca.crt", b"-----BEGIN CERTIFICATE-----".to_vec())],
        )
        .await
        .expect("push failed");

    let request = device.requests.recv().await.expect("no request recorded");
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/config/update");

    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains(r#"name="config.json""#));
    assert!(body.contains(FIXTURE));
    assert!(body.contains(r#"name="ca.crt"; filename="ca.crt""#));
    assert!(body.contains("-----BEGIN CERTIFICATE-----"));
}

#[tokio::test]
async fn push_firmware_sends_image_unchanged() {
    let mut device = start_fake_device(|_| Reply::Status(200, "OK")).await;
    let content = vec![0xe9, 0x03, 0x02, 0x20, 0xff, 0x00];

    transport_for(&device)
        .push_firmware(FirmwareImage {
            file_name: "espac.bin".to_string(),
            content: content.clone(),
        })
        .await
        .expect("firmware upload failed");

    let request = device.requests.recv().await.expect("no request recorded");
    assert_eq!(request.path, "/firmware");
    assert!(
        request
            .body
            .windows(content.len())
            .any(|window| window == content.as_slice())
    );
    assert!(String::from_utf8_lossy(&request.body).contains(r#"name="firmware"; filename="espac.bin""#));
}

#[tokio::test]
async fn server_error_on_push_is_a_status_error() {
    let device = start_fake_device(|_| Reply::Status(500, "flash write failed")).await;

    let err = transport_for(&device)
        .push_config(FIXTURE.to_string(), vec![])
        .await
        .expect_err("push must fail");
    assert!(matches!(err, TransportError::Status { status: 500 }));
    assert!(!err.is_connection());
}
