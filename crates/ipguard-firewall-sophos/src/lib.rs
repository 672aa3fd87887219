// # Sophos Firewall Client
//
// This crate provides the Sophos XML API implementation of `FirewallClient`.
//
// ## Protocol
//
// Every operation is one `POST https://<host>:4444/webconsole/APIController`
// with a multipart form whose `reqxml` field carries the request document:
//
// ```xml
// <Request>
//     <Login><Username>..</Username><Password>..</Password></Login>
//     <Set> <IPHost>..</IPHost> | <FirewallRule>..</FirewallRule> </Set>
// </Request>
// ```
//
// The device answers HTTP 200 for most application errors, so the body is
// inspected before the status code:
//
// | Body contains                     | Error                 |
// |-----------------------------------|-----------------------|
// | `Authentication Failure`          | `Error::RemoteAuth`   |
// | `<Status>Failure</Status>`        | `Error::RemoteApi`    |
// | `<Error>`                         | `Error::RemoteApi`    |
// | (non-2xx status, clean body)      | `Error::RemoteTransport` |
//
// ## Constraints
//
// - One request per call, no retries (owned by the engine)
// - Credentials are taken from the `DeviceConfig` of each call, never cached
// - Certificate validation is relaxed only when the device asks for it, and
//   only on this client's own connection pool
//
// ## Security
//
// The password is XML-escaped into the request body and never logged.

use async_trait::async_trait;
use ipguard_core::config::{DeviceConfig, RuleConfig};
use ipguard_core::traits::FirewallClient;
use ipguard_core::{Error, RemoteBatch, Result};
use reqwest::StatusCode;
use reqwest::multipart::Form;
use std::fmt::Write as _;
use std::time::Duration;

/// Default HTTP timeout for API requests (2 minutes)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Multipart field carrying the request document
const REQUEST_FIELD: &str = "reqxml";

const AUTH_FAILURE_MARKER: &str = "Authentication Failure";
const STATUS_FAILURE_MARKER: &str = "<Status>Failure</Status>";
const ERROR_MARKER: &str = "<Error>";

/// Longest slice of a response body copied into an error message
const MAX_ERROR_BODY: usize = 512;

/// Sophos XML API client
///
/// Holds two connection pools: one validating certificates against the
/// public roots, one accepting the device's self-signed certificate. The
/// device configuration of each call selects the pool.
#[derive(Debug, Clone)]
pub struct SophosClient {
    verified: reqwest::Client,
    unverified: reqwest::Client,
}

impl SophosClient {
    /// Create a client with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if an HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let build = |accept_invalid_certs: bool| {
            reqwest::Client::builder()
                .timeout(timeout)
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
                .map_err(|e| Error::config(format!("Failed to create firewall HTTP client: {}", e)))
        };

        Ok(Self {
            verified: build(false)?,
            unverified: build(true)?,
        })
    }

    fn client_for(&self, device: &DeviceConfig) -> &reqwest::Client {
        if device.accept_invalid_certs {
            &self.unverified
        } else {
            &self.verified
        }
    }

    /// Post one request document and validate the response
    async fn send(&self, device: &DeviceConfig, operation: &str, xml: String) -> Result<String> {
        let url = device.api_url();
        tracing::debug!("Sending {} request to {}", operation, device.host);

        let form = Form::new().text(REQUEST_FIELD, xml);
        let response = self
            .client_for(device)
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                Error::remote_transport(format!(
                    "{} request to {} failed: {}",
                    operation, device.host, e
                ))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            Error::remote_transport(format!("Failed to read {} response: {}", operation, e))
        })?;

        check_response(status, &body)?;
        Ok(body)
    }
}

/// Classify a device response
///
/// Body markers take precedence over the HTTP status.
pub fn check_response(status: StatusCode, body: &str) -> Result<()> {
    if body.contains(AUTH_FAILURE_MARKER) {
        return Err(Error::remote_auth("Authentication failed with Sophos Firewall"));
    }
    if body.contains(STATUS_FAILURE_MARKER) || body.contains(ERROR_MARKER) {
        let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
        return Err(Error::remote_api(format!("Sophos API Error: {}", excerpt)));
    }
    if !status.is_success() {
        return Err(Error::remote_transport(format!(
            "Sophos API returned HTTP {}",
            status
        )));
    }
    Ok(())
}

/// Escape text for use inside an XML element
pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn envelope(device: &DeviceConfig, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Request>
    <Login>
        <Username>{}</Username>
        <Password>{}</Password>
    </Login>
{}
</Request>"#,
        xml_escape(&device.username),
        xml_escape(&device.password),
        body
    )
}

/// Read-only request used to check reachability and credentials
pub fn probe_request(device: &DeviceConfig) -> String {
    envelope(
        device,
        r#"    <Get>
        <IPHost></IPHost>
    </Get>"#,
    )
}

/// Create-or-replace request for one address list object
pub fn address_list_request(device: &DeviceConfig, batch: &RemoteBatch) -> String {
    let addresses = batch
        .addresses
        .iter()
        .map(|addr| addr.to_string())
        .collect::<Vec<_>>()
        .join(",");

    envelope(
        device,
        &format!(
            r#"    <Set>
        <IPHost>
            <Name>{}</Name>
            <IPFamily>IPv4</IPFamily>
            <HostType>IPList</HostType>
            <ListOfIPAddresses>{}</ListOfIPAddresses>
        </IPHost>
    </Set>"#,
            xml_escape(&batch.name),
            addresses
        ),
    )
}

/// Create-or-replace request for the blocking rule
///
/// Source networks are exactly the first `batch_count` list objects.
pub fn rule_request(device: &DeviceConfig, rule: &RuleConfig, batch_count: usize) -> String {
    let mut networks = String::new();
    for index in 0..batch_count {
        let _ = writeln!(
            networks,
            "                    <Network>{}</Network>",
            xml_escape(&rule.list_name(index))
        );
    }

    envelope(
        device,
        &format!(
            r#"    <Set>
        <FirewallRule transactionid="">
            <Name>{}</Name>
            <Description>{}</Description>
            <IPFamily>IPv4</IPFamily>
            <Status>Enable</Status>
            <Position>Top</Position>
            <PolicyType>Network</PolicyType>
            <NetworkPolicy>
                <Action>Drop</Action>
                <LogTraffic>Enable</LogTraffic>
                <SkipLocalDestined>Disable</SkipLocalDestined>
                <Schedule>All The Time</Schedule>
                <SourceNetworks>
{}                </SourceNetworks>
            </NetworkPolicy>
        </FirewallRule>
    </Set>"#,
            xml_escape(&rule.rule_name),
            xml_escape(&rule.description),
            networks
        ),
    )
}

#[async_trait]
impl FirewallClient for SophosClient {
    async fn verify_connection(&self, device: &DeviceConfig) -> Result<()> {
        self.send(device, "connection test", probe_request(device))
            .await?;
        tracing::info!("Connected to Sophos firewall at {}", device.host);
        Ok(())
    }

    async fn push_address_list(&self, device: &DeviceConfig, batch: &RemoteBatch) -> Result<()> {
        self.send(device, "address list", address_list_request(device, batch))
            .await?;
        tracing::debug!(
            "Address list {} applied ({} addresses)",
            batch.name,
            batch.addresses.len()
        );
        Ok(())
    }

    async fn push_rule(
        &self,
        device: &DeviceConfig,
        rule: &RuleConfig,
        batch_count: usize,
    ) -> Result<()> {
        self.send(device, "firewall rule", rule_request(device, rule, batch_count))
            .await?;
        tracing::debug!(
            "Firewall rule {} applied with {} source lists",
            rule.rule_name,
            batch_count
        );
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        "sophos"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipguard_core::AddressSet;
    use std::net::Ipv4Addr;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OK_BODY: &str = r#"<Response><IPHost transactionid=""><Status code="200">Configuration applied successfully.</Status></IPHost></Response>"#;

    fn device_for(server: &MockServer) -> DeviceConfig {
        let mut device = DeviceConfig::new("127.0.0.1", "admin", "p@ss<word>&");
        device.scheme = "http".to_string();
        device.port = server.address().port();
        device
    }

    fn batch(index: usize, addrs: &[[u8; 4]]) -> RemoteBatch {
        RemoteBatch {
            index,
            name: format!("IPThreatList_{}", index),
            addresses: addrs.iter().map(|a| Ipv4Addr::from(*a)).collect(),
        }
    }

    #[tokio::test]
    async fn test_push_address_list_posts_reqxml() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webconsole/APIController"))
            .and(body_string_contains("name=\"reqxml\""))
            .and(body_string_contains("<Name>IPThreatList_0</Name>"))
            .and(body_string_contains("<ListOfIPAddresses>1.2.3.4,5.6.7.8</ListOfIPAddresses>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(OK_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let client = SophosClient::new().unwrap();
        client
            .push_address_list(&device_for(&server), &batch(0, &[[1, 2, 3, 4], [5, 6, 7, 8]]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_authentication_failure_detected_in_200_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<Response><Login><status>Authentication Failure</status></Login></Response>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = SophosClient::new().unwrap();
        let err = client.verify_connection(&device_for(&server)).await.unwrap_err();

        assert!(matches!(err, Error::RemoteAuth(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_api_failure_detected_in_200_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<Response><FirewallRule><Status>Failure</Status></FirewallRule></Response>",
            ))
            .mount(&server)
            .await;

        let client = SophosClient::new().unwrap();
        let err = client
            .push_rule(&device_for(&server), &RuleConfig::default(), 2)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RemoteApi(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let client = SophosClient::new().unwrap();
        let err = client.verify_connection(&device_for(&server)).await.unwrap_err();

        assert!(matches!(err, Error::RemoteTransport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_device_is_transport_failure() {
        let mut device = DeviceConfig::new("127.0.0.1", "admin", "secret");
        device.scheme = "http".to_string();
        device.port = 9;

        let client = SophosClient::new().unwrap();
        let err = client.verify_connection(&device).await.unwrap_err();

        assert!(matches!(err, Error::RemoteTransport(_)));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn test_markers_take_precedence_over_status() {
        assert!(matches!(
            check_response(StatusCode::INTERNAL_SERVER_ERROR, "Authentication Failure"),
            Err(Error::RemoteAuth(_))
        ));
        assert!(matches!(
            check_response(StatusCode::OK, "<Response><Error>bad</Error></Response>"),
            Err(Error::RemoteApi(_))
        ));
        assert!(check_response(StatusCode::OK, OK_BODY).is_ok());
    }

    #[test]
    fn test_rule_references_exactly_batch_count_lists() {
        let device = DeviceConfig::new("fw", "admin", "secret");
        let xml = rule_request(&device, &RuleConfig::default(), 3);

        for i in 0..3 {
            assert!(xml.contains(&format!("<Network>IPThreatList_{}</Network>", i)));
        }
        assert!(!xml.contains("IPThreatList_3"));
        assert!(xml.contains("<Name>Block_IPThreat_List</Name>"));
        assert!(xml.contains("<Action>Drop</Action>"));
        assert!(xml.contains("<Schedule>All The Time</Schedule>"));
        assert!(xml.contains("<Position>Top</Position>"));
    }

    #[test]
    fn test_requests_are_deterministic() {
        let device = DeviceConfig::new("fw", "admin", "secret");
        let set: AddressSet = (0..2500u32).map(|i| Ipv4Addr::from(0x0A00_0000 + i)).collect();
        let batches = RemoteBatch::split(&set, "IPThreatList", 1000);

        let render = || -> Vec<String> {
            batches
                .iter()
                .map(|b| address_list_request(&device, b))
                .collect()
        };
        let first = render();
        let second = render();
        assert_eq!(first, second);
    }

    #[test]
    fn test_credentials_are_escaped() {
        let device = DeviceConfig::new("fw", "ad<min>", "p&ss\"'");
        let xml = probe_request(&device);

        assert!(xml.contains("<Username>ad&lt;min&gt;</Username>"));
        assert!(xml.contains("<Password>p&amp;ss&quot;&apos;</Password>"));
        assert!(xml.contains("<Get>"));
    }
}
