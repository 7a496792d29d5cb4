//! AWS SQS backend using the HTTP query API.
//!
//! Requests are signed with AWS Signature V4 and sent with `reqwest`; responses
//! are XML and parsed with `quick-xml`. Talking to the query API directly keeps
//! the provider testable against a mocked HTTP endpoint.
//!
//! ## Authentication
//!
//! Credentials come from [`AwsSqsConfig`] when set there, otherwise from the
//! standard `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`
//! environment variables. Without credentials every request fails with
//! [`QueueError::AuthenticationFailed`].
//!
//! ## Example
//!
//! ```no_run
//! use queue_poller::providers::AwsSqsProvider;
//! use queue_poller::AwsSqsConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = AwsSqsProvider::new(AwsSqsConfig {
//!     region: "eu-west-1".to_string(),
//!     ..Default::default()
//! })?;
//! # Ok(())
//! # }
//! ```

use crate::backend::QueueBackend;
use crate::config::{AwsSqsConfig, ProviderType};
use crate::error::{ConfigurationError, QueueError};
use crate::message::{MessageId, QueueUrl, ReceiptHandle, ReceivedMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

// ============================================================================
// Error Types
// ============================================================================

/// AWS SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("SQS service error: {code} - {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AwsError {
    /// Map AWS error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: ProviderType::AwsSqs.to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue) => QueueError::QueueNotFound { queue_url: queue },
            Self::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::SerializationError(msg) => QueueError::Serialization { message: msg },
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// Static credentials used to sign requests
#[derive(Clone)]
struct AwsCredentials {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    /// Resolve credentials from configuration, then from the environment
    fn resolve(config: &AwsSqsConfig) -> Option<Self> {
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            return Some(Self {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                session_token: config.session_token.clone(),
            });
        }

        let access_key = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        if access_key.is_empty() || secret_key.is_empty() {
            return None;
        }

        Some(Self {
            access_key,
            secret_key,
            session_token: std::env::var("AWS_SESSION_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
        })
    }
}

/// AWS Signature Version 4 signer for request authentication
///
/// Implements the AWS Signature V4 signing process:
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(credentials: AwsCredentials, region: String) -> Self {
        Self {
            credentials,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign an HTTP request with AWS Signature V4
    ///
    /// Returns the headers to add to the request: `Authorization`,
    /// `x-amz-date`, `host` and, for temporary credentials,
    /// `x-amz-security-token`.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        query_params: &[(String, String)],
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_query_string = canonical_query_string(query_params);

        // Canonical headers (must be sorted)
        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = "host;x-amz-date".to_string();
        if let Some(token) = &self.credentials.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.credentials.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = vec![
            ("Authorization".to_string(), authorization_header),
            ("x-amz-date".to_string(), amz_date),
            ("host".to_string(), host.to_string()),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        headers
    }

    /// Calculate AWS Signature V4 signature
    ///
    /// kSecret = "AWS4" + secret_key, then HMAC over date, region, service and
    /// "aws4_request" in turn; the result signs `string_to_sign`.
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.credentials.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode and sort query parameters by key, then value
fn canonical_query_string(query_params: &[(String, String)]) -> String {
    let mut encoded = query_params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect::<Vec<_>>();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// AWS SQS Provider
// ============================================================================

/// AWS SQS queue backend
///
/// Shared across the poll task and all message tasks behind an `Arc`; it holds
/// no mutable state.
pub struct AwsSqsProvider {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    config: AwsSqsConfig,
    endpoint: url::Url,
}

impl AwsSqsProvider {
    /// Create new AWS SQS provider
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client cannot
    /// be built. No request is sent.
    pub fn new(config: AwsSqsConfig) -> Result<Self, AwsError> {
        config
            .validate()
            .map_err(|e| AwsError::ConfigurationError(e.to_string()))?;

        let signer = AwsCredentials::resolve(&config)
            .map(|credentials| AwsV4Signer::new(credentials, config.region.clone()));

        let endpoint = url::Url::parse(&config.endpoint_url()).map_err(|e| {
            AwsError::ConfigurationError(format!("Invalid endpoint URL: {}", e))
        })?;

        let http_client = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AwsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            config,
            endpoint,
        })
    }

    /// Check whether request signing credentials were found
    pub fn has_credentials(&self) -> bool {
        self.signer.is_some()
    }

    /// `host[:port]` as sent in the Host header
    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Make a signed query API request and return the response body
    async fn make_request(&self, query_params: &[(String, String)]) -> Result<String, AwsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| AwsError::Authentication("No credentials configured".to_string()))?;

        let method = "POST";
        let path = match self.endpoint.path() {
            "" => "/",
            path => path,
        };
        let host = self.host();
        let timestamp = Utc::now();

        let auth_headers = signer.sign_request(method, &host, path, query_params, "", &timestamp);

        let url = format!(
            "{}://{}{}?{}",
            self.endpoint.scheme(),
            host,
            path,
            canonical_query_string(query_params)
        );

        let mut request = self.http_client.post(&url);
        for (key, value) in auth_headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Timeout(self.config.request_timeout())
            } else if e.is_connect() {
                AwsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AwsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| AwsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }

    /// Parameters common to every request against one queue
    fn base_params(&self, action: &str, queue: &QueueUrl) -> Vec<(String, String)> {
        vec![
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), self.config.api_version.clone()),
            ("QueueUrl".to_string(), queue.as_str().to_string()),
        ]
    }

    fn receive_params(&self, queue: &QueueUrl) -> Vec<(String, String)> {
        let mut params = self.base_params("ReceiveMessage", queue);
        params.push(("AttributeName.1".to_string(), "All".to_string()));
        params.push(("MessageAttributeName.1".to_string(), "All".to_string()));

        if let Some(max) = self.config.max_number_of_messages {
            params.push(("MaxNumberOfMessages".to_string(), max.to_string()));
        }
        if let Some(wait) = self.config.wait_time_seconds {
            params.push(("WaitTimeSeconds".to_string(), wait.to_string()));
        }
        if let Some(visibility) = self.config.visibility_timeout_seconds {
            params.push(("VisibilityTimeout".to_string(), visibility.to_string()));
        }

        params
    }
}

impl fmt::Debug for AwsSqsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsProvider")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint.as_str())
            .field("has_credentials", &self.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl QueueBackend for AwsSqsProvider {
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let params = self.receive_params(queue);

        let response = self
            .make_request(&params)
            .await
            .map_err(|e| e.to_queue_error())?;

        parse_receive_message_response(&response).map_err(|e| e.to_queue_error())
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut params = self.base_params("DeleteMessage", queue);
        params.push(("ReceiptHandle".to_string(), receipt.as_str().to_string()));

        // DeleteMessage returns an empty result on success
        self.make_request(&params)
            .await
            .map_err(|e| e.to_queue_error())?;

        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}

// ============================================================================
// XML Parsing
// ============================================================================

/// Parse error response from XML
fn parse_error_response(xml: &str, status_code: u16) -> AwsError {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| format!("HTTP{}", status_code));
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            AwsError::QueueNotFound(message)
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "MissingAuthenticationToken"
        | "ExpiredToken" => AwsError::Authentication(format!("{}: {}", code, message)),
        "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" => AwsError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            AwsError::Authentication(format!("{}: {}", code, message))
        }
        _ => AwsError::ServiceError { code, message },
    }
}

/// Which text node inside a `<Message>` is being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    MessageId,
    ReceiptHandle,
    Body,
    AttributeName,
    AttributeValue,
    MessageAttributeName,
    MessageAttributeStringValue,
}

/// Accumulates the fields of one `<Message>` element
#[derive(Default)]
struct MessageBuilder {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
    attributes: HashMap<String, String>,
    message_attributes: HashMap<String, String>,
    attribute_name: String,
    attribute_value: String,
}

impl MessageBuilder {
    fn build(self) -> Result<ReceivedMessage, AwsError> {
        let receipt_handle = self.receipt_handle.ok_or_else(|| {
            AwsError::SerializationError("Message without ReceiptHandle".to_string())
        })?;

        let message_id = self
            .message_id
            .as_deref()
            .and_then(|id| MessageId::from_str(id).ok())
            .ok_or_else(|| AwsError::SerializationError("Message without MessageId".to_string()))?;

        let delivery_count = self
            .attributes
            .get("ApproximateReceiveCount")
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        Ok(ReceivedMessage {
            message_id,
            receipt_handle: ReceiptHandle::new(receipt_handle),
            body: self.body.unwrap_or_default(),
            attributes: self.attributes,
            message_attributes: self.message_attributes,
            delivery_count,
        })
    }
}

/// Parse ReceiveMessage XML response
///
/// Bodies are kept byte-for-byte (no whitespace trimming); decoding them is
/// the message processor's job.
fn parse_receive_message_response(xml: &str) -> Result<Vec<ReceivedMessage>, AwsError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut messages = Vec::new();
    let mut current: Option<MessageBuilder> = None;
    let mut field = Field::None;
    let mut in_attribute = false;
    let mut in_message_attribute = false;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            AwsError::SerializationError(format!("XML parsing error: {}", e))
        })?;

        match event {
            Event::Start(ref e) => match (e.name().as_ref(), current.as_mut()) {
                (b"Message", _) => {
                    current = Some(MessageBuilder::default());
                    in_attribute = false;
                    in_message_attribute = false;
                }
                (b"MessageId", Some(_)) => field = Field::MessageId,
                (b"ReceiptHandle", Some(_)) => field = Field::ReceiptHandle,
                (b"Body", Some(builder)) => {
                    builder.body = Some(String::new());
                    field = Field::Body;
                }
                (b"Attribute", Some(builder)) => {
                    in_attribute = true;
                    builder.attribute_name.clear();
                    builder.attribute_value.clear();
                }
                (b"MessageAttribute", Some(builder)) => {
                    in_message_attribute = true;
                    builder.attribute_name.clear();
                    builder.attribute_value.clear();
                }
                (b"Name", Some(_)) if in_attribute => field = Field::AttributeName,
                (b"Value", Some(_)) if in_attribute => field = Field::AttributeValue,
                (b"Name", Some(_)) if in_message_attribute => field = Field::MessageAttributeName,
                (b"StringValue", Some(_)) if in_message_attribute => {
                    field = Field::MessageAttributeStringValue
                }
                _ => {}
            },
            Event::Empty(ref e) => {
                if let (b"Body", Some(builder)) = (e.name().as_ref(), current.as_mut()) {
                    builder.body = Some(String::new());
                }
            }
            Event::Text(ref e) => {
                if let Some(builder) = current.as_mut() {
                    if field != Field::None {
                        let text = e.unescape().map_err(|e| {
                            AwsError::SerializationError(format!("Failed to unescape XML: {}", e))
                        })?;
                        append_field(builder, field, &text);
                    }
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"Message" => {
                    if let Some(builder) = current.take() {
                        messages.push(builder.build()?);
                    }
                    field = Field::None;
                }
                b"Attribute" => {
                    if let Some(builder) = current.as_mut() {
                        let name = std::mem::take(&mut builder.attribute_name);
                        let value = std::mem::take(&mut builder.attribute_value);
                        builder.attributes.insert(name, value);
                    }
                    in_attribute = false;
                }
                b"MessageAttribute" => {
                    if let Some(builder) = current.as_mut() {
                        let name = std::mem::take(&mut builder.attribute_name);
                        let value = std::mem::take(&mut builder.attribute_value);
                        builder.message_attributes.insert(name, value);
                    }
                    in_message_attribute = false;
                }
                _ => field = Field::None,
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

fn append_field(builder: &mut MessageBuilder, field: Field, text: &str) {
    let target = match field {
        Field::None => return,
        Field::MessageId => builder.message_id.get_or_insert_with(String::new),
        Field::ReceiptHandle => builder.receipt_handle.get_or_insert_with(String::new),
        Field::Body => builder.body.get_or_insert_with(String::new),
        Field::AttributeName | Field::MessageAttributeName => &mut builder.attribute_name,
        Field::AttributeValue | Field::MessageAttributeStringValue => &mut builder.attribute_value,
    };
    target.push_str(text);
}
