use crate::{
    config::DeviceConfig,
    error::TransportError,
    http_client::{device_client, handle_http_response},
};
use anyhow::{Context, Result, ensure};
use log::info;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{
    Client, Url,
    multipart::{Form, Part},
};
use std::time::Duration;
use trait_variant::make;

/// Extra file posted next to the configuration, e.g. a CA certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// Form field the firmware reads the file from, also used as file name
    /// unless `file_name` is set.
    pub field_name: String,
    pub file_name: Option<String>,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(field_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: None,
            content,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareImage {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Requests understood by the device firmware.
///
/// Implementations never interpret failures, a dropped connection during a
/// push is reported like any other [`TransportError`].
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DeviceTransport {
    /// Read the persisted configuration as hex.
    async fn fetch_config(&self) -> Result<String, TransportError>;
    /// Store a hex encoded configuration plus optional files.
    async fn push_config(
        &self,
        config: String,
        attachments: Vec<Attachment>,
    ) -> Result<(), TransportError>;
    async fn push_firmware(&self, image: FirmwareImage) -> Result<(), TransportError>;
    /// Liveness probe, succeeds once the device accepts requests again.
    async fn ping(&self) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct HttpDeviceTransport {
    client: Client,
    base_url: String,
    upload_timeout: Duration,
}

impl HttpDeviceTransport {
    // API endpoint constants
    const CONFIG_ENDPOINT: &str = "/config.dat";
    const UPDATE_ENDPOINT: &str = "/config/update";
    const FIRMWARE_ENDPOINT: &str = "/firmware";
    const PING_ENDPOINT: &str = "/config/ping";

    /// Form field holding the hex payload, the name predates the binary format.
    pub const CONFIG_FORM_FIELD: &str = "config.json";
    pub const FIRMWARE_FORM_FIELD: &str = "firmware";

    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .with_context(|| format!("failed to parse device url {}", config.url))?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            "failed to parse device url {}: expected http or https",
            config.url
        );

        let client = device_client(config.request_timeout)?;

        Ok(HttpDeviceTransport {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            upload_timeout: config.upload_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        // Normalize path to always start with a single "/"
        let normalized_path = path.trim_start_matches('/');
        format!("{}/{normalized_path}", self.base_url)
    }

    /// GET request to the device
    async fn get(&self, path: &str) -> Result<String, TransportError> {
        let url = self.build_url(path);
        info!("GET {url}");

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| send_error(format!("GET {url}"), e))?;

        handle_http_response(res, &format!("GET {url}")).await
    }

    /// POST multipart form to the device
    async fn post_form(&self, path: &str, form: Form) -> Result<String, TransportError> {
        let url = self.build_url(path);
        info!("POST {url}");

        let res = self
            .client
            .post(&url)
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_error(format!("POST {url}"), e))?;

        handle_http_response(res, &format!("POST {url}")).await
    }

    fn config_form(config: String, attachments: Vec<Attachment>) -> Form {
        attachments.into_iter().fold(
            Form::new().text(Self::CONFIG_FORM_FIELD, config),
            |form, attachment| {
                let file_name = attachment
                    .file_name
                    .unwrap_or_else(|| attachment.field_name.clone());
                form.part(
                    attachment.field_name,
                    Part::bytes(attachment.content).file_name(file_name),
                )
            },
        )
    }
}

/// A request that could not be built never reached the device, so it must not
/// look like a dropped connection.
fn send_error(context_msg: String, e: reqwest::Error) -> TransportError {
    if e.is_builder() {
        TransportError::InvalidRequest(format!("{context_msg}: {e}"))
    } else {
        TransportError::Connection(format!("{context_msg}: {e}"))
    }
}

impl DeviceTransport for HttpDeviceTransport {
    async fn fetch_config(&self) -> Result<String, TransportError> {
        self.get(Self::CONFIG_ENDPOINT).await
    }

    async fn push_config(
        &self,
        config: String,
        attachments: Vec<Attachment>,
    ) -> Result<(), TransportError> {
        let form = Self::config_form(config, attachments);
        self.post_form(Self::UPDATE_ENDPOINT, form).await?;
        Ok(())
    }

    async fn push_firmware(&self, image: FirmwareImage) -> Result<(), TransportError> {
        let form = Form::new().part(
            Self::FIRMWARE_FORM_FIELD,
            Part::bytes(image.content).file_name(image.file_name),
        );
        self.post_form(Self::FIRMWARE_ENDPOINT, form).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.get(Self::PING_ENDPOINT).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_transport(url: &str) -> HttpDeviceTransport {
        HttpDeviceTransport::new(&DeviceConfig {
            url: url.to_string(),
            request_timeout: Duration::from_secs(1),
            upload_timeout: Duration::from_secs(1),
        })
        .expect("failed to create transport")
    }

    mod build_url {
        use super::*;

        #[test]
        fn normalizes_path_with_leading_slash() {
            let transport = create_test_transport("http://192.168.4.1");
            assert_eq!(
                transport.build_url("/config.dat"),
                "http://192.168.4.1/config.dat"
            );
        }

        #[test]
        fn normalizes_path_without_leading_slash() {
            let transport = create_test_transport("http://192.168.4.1");
            assert_eq!(
                transport.build_url("config/ping"),
                "http://192.168.4.1/config/ping"
            );
        }

        #[test]
        fn strips_trailing_slashes_from_base() {
            let transport = create_test_transport("http://espac.local//");
            assert_eq!(transport.base_url(), "http://espac.local");
            assert_eq!(
                transport.build_url("///firmware"),
                "http://espac.local/firmware"
            );
        }

        #[test]
        fn handles_root_path() {
            let transport = create_test_transport("http://192.168.4.1");
            assert_eq!(transport.build_url("/"), "http://192.168.4.1/");
        }
    }

    mod new {
        use super::*;

        #[test]
        fn rejects_url_without_scheme() {
            let result = HttpDeviceTransport::new(&DeviceConfig {
                url: "192.168.4.1".to_string(),
                ..Default::default()
            });
            assert!(result.is_err());
        }

        #[test]
        fn rejects_non_http_scheme() {
            let err = HttpDeviceTransport::new(&DeviceConfig {
                url: "ftp://192.168.4.1".to_string(),
                ..Default::default()
            })
            .err()
            .expect("ftp url must be rejected");
            assert!(err.to_string().contains("expected http or https"));
        }

        #[tokio::test]
        async fn unsendable_request_is_not_a_connection_error() {
            // bypasses the check in new() to reach reqwest's own scheme check
            let transport = HttpDeviceTransport {
                base_url: "ftp://192.168.4.1".to_string(),
                ..create_test_transport("http://192.168.4.1")
            };

            let err = transport.ping().await.expect_err("ftp request must fail");
            assert!(err.is_invalid_request(), "unexpected error: {err}");
            assert!(!err.is_connection());
        }
    }

    mod attachments {
        use super::*;

        #[test]
        fn file_name_defaults_to_none() {
            let attachment = Attachment::new("ca.crt", b"pem".to_vec());
            assert_eq!(attachment.field_name, "ca.crt");
            assert_eq!(attachment.file_name, None);
        }

        #[test]
        fn with_file_name_overrides() {
            let attachment =
                Attachment::new("mqtt_ca", b"pem".to_vec()).with_file_name("ca.crt");
            assert_eq!(attachment.file_name.as_deref(), Some("ca.crt"));
        }
    }

    mod constants {
        use super::*;

        #[test]
        fn api_endpoints_are_correctly_defined() {
            assert_eq!(HttpDeviceTransport::CONFIG_ENDPOINT, "/config.dat");
            assert_eq!(HttpDeviceTransport::UPDATE_ENDPOINT, "/config/update");
            assert_eq!(HttpDeviceTransport::FIRMWARE_ENDPOINT, "/firmware");
            assert_eq!(HttpDeviceTransport::PING_ENDPOINT, "/config/ping");
            assert_eq!(HttpDeviceTransport::CONFIG_FORM_FIELD, "config.json");
        }
    }
}
