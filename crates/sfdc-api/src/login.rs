//! Username/password login against the SOAP partner endpoint.

use reqwest::header::CONTENT_TYPE;
use tracing::{info, instrument};
use url::Url;

use crate::config::SalesforceConfig;
use crate::{ApiError, ApiResult};

const CLIENT_NAME: &str = "sfdc-api";

/// Credentials obtained from a successful login.
#[derive(Clone)]
pub struct LoginInfo {
    /// Session id, used as a bearer token.
    pub access_token: String,
    /// Scheme and authority of the instance serving this organisation.
    pub instance_url: String,
}

impl std::fmt::Debug for LoginInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginInfo")
            .field("access_token", &"<redacted>")
            .field("instance_url", &self.instance_url)
            .finish()
    }
}

impl LoginInfo {
    /// Value of the `Authorization` header for REST and streaming calls.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Host name of the instance.
    #[must_use]
    pub fn instance_host(&self) -> &str {
        self.instance_url
            .split_once("://")
            .map_or(self.instance_url.as_str(), |(_, rest)| rest)
    }
}

/// Log in with the configured username, password and security token.
///
/// # Errors
/// Returns [`ApiError::Authentication`] if the credentials are rejected, or a
/// transport error if the login endpoint cannot be reached.
#[instrument(skip(http, config), fields(username = %config.username, sandbox = config.sandbox))]
pub async fn login(http: &reqwest::Client, config: &SalesforceConfig) -> ApiResult<LoginInfo> {
    let url = format!(
        "{}/services/Soap/u/{}",
        config.login_url(),
        config.api_version
    );
    let body = login_envelope(
        &config.username,
        &format!("{}{}", config.password, config.security_token),
    );

    let response = http
        .post(&url)
        .header(CONTENT_TYPE, "text/xml; charset=UTF-8")
        .header("SOAPAction", "login")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let code = extract_tag(&text, "sf:exceptionCode")
            .or_else(|| extract_tag(&text, "faultcode"))
            .unwrap_or("UNKNOWN_EXCEPTION");
        let message = extract_tag(&text, "sf:exceptionMessage")
            .or_else(|| extract_tag(&text, "faultstring"))
            .unwrap_or("login failed");
        return Err(ApiError::Authentication(format!("{code}: {message}")));
    }

    let access_token = extract_tag(&text, "sessionId")
        .ok_or_else(|| ApiError::UnexpectedResponse("login response has no sessionId".into()))?
        .to_string();
    let server_url = extract_tag(&text, "serverUrl")
        .ok_or_else(|| ApiError::UnexpectedResponse("login response has no serverUrl".into()))?;

    let instance_url = instance_url_from_server_url(server_url)?;
    info!(username = %config.username, instance = %instance_url, "Logged in to Salesforce");

    Ok(LoginInfo {
        access_token,
        instance_url,
    })
}

fn login_envelope(username: &str, password: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<env:Envelope
        xmlns:xsd="http://www.w3.org/2001/XMLSchema"
        xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
        xmlns:env="http://schemas.xmlsoap.org/soap/envelope/"
        xmlns:urn="urn:partner.soap.sforce.com">
    <env:Header>
        <urn:CallOptions>
            <urn:client>{CLIENT_NAME}</urn:client>
            <urn:defaultNamespace>sf</urn:defaultNamespace>
        </urn:CallOptions>
    </env:Header>
    <env:Body>
        <n1:login xmlns:n1="urn:partner.soap.sforce.com">
            <n1:username>{}</n1:username>
            <n1:password>{}</n1:password>
        </n1:login>
    </env:Body>
</env:Envelope>"#,
        xml_escape(username),
        xml_escape(password),
    )
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn extract_tag<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim())
}

/// `https://na1-api.salesforce.com/services/Soap/u/37.0/00D...` becomes
/// `https://na1.salesforce.com`.
fn instance_url_from_server_url(server_url: &str) -> ApiResult<String> {
    let parsed = Url::parse(server_url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ApiError::UnexpectedResponse(format!("serverUrl has no host: {server_url}")))?
        .replace("-api", "");
    Ok(match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    })
}
