//! SOAP partner login.

use sfpipe_client::{instance_url_from_server_url, SfHttpClient};
use tracing::{debug, instrument};

use crate::credentials::LoginCredentials;
use crate::error::{Error, ErrorKind, Result};
use crate::session::SessionInfo;

impl LoginCredentials {
    /// Exchange the credentials for a session.
    ///
    /// The username and password are not logged.
    #[instrument(skip(self, http), fields(login_url = %self.login_url()))]
    pub async fn login(&self, http: &SfHttpClient) -> Result<SessionInfo> {
        self.validate()?;

        let request = http
            .post(self.soap_endpoint())
            .xml(login_envelope(self.username(), &self.login_password()))
            .soap_action("login");

        let response = http.execute_raw(&request).await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(status, bytes = body.len(), "Login response received");

        parse_login_response(&body)
    }
}

fn login_envelope(username: &str, password: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">
  <env:Body>
    <n1:login xmlns:n1="urn:partner.soap.sforce.com">
      <n1:username>{}</n1:username>
      <n1:password>{}</n1:password>
    </n1:login>
  </env:Body>
</env:Envelope>"#,
        escape_xml(username),
        escape_xml(password)
    )
}

/// Parse a login response body, mapping SOAP faults to `LoginFault`.
pub(crate) fn parse_login_response(xml: &str) -> Result<SessionInfo> {
    if let Some(code) = extract_element(xml, "faultcode") {
        let message =
            extract_element(xml, "faultstring").unwrap_or_else(|| "Unknown error".to_string());
        return Err(Error::new(ErrorKind::LoginFault { code, message }));
    }

    let session_id = extract_element(xml, "sessionId").ok_or_else(|| {
        Error::new(ErrorKind::MalformedResponse("missing sessionId".to_string()))
    })?;
    let server_url = extract_element(xml, "serverUrl").ok_or_else(|| {
        Error::new(ErrorKind::MalformedResponse("missing serverUrl".to_string()))
    })?;
    let instance_url = instance_url_from_server_url(&server_url).map_err(|e| {
        Error::with_source(
            ErrorKind::MalformedResponse(format!("invalid serverUrl: {server_url}")),
            e,
        )
    })?;

    Ok(SessionInfo {
        session_id,
        server_url,
        instance_url,
        user_id: extract_element(xml, "userId"),
        organization_id: extract_element(xml, "organizationId"),
        sandbox: extract_element(xml, "sandbox").is_some_and(|v| v == "true"),
        password_expired: extract_element(xml, "passwordExpired").is_some_and(|v| v == "true"),
    })
}

/// Extract the text of the first `<tag>` (optionally namespace-prefixed).
fn extract_element(xml: &str, tag: &str) -> Option<String> {
    let end_tag = format!("</{}>", tag);
    let start_patterns = [
        format!("<{}>", tag),
        format!("<{}:{}>", "soapenv", tag),
        format!("<{}:{}>", "sf", tag),
    ];

    for start in &start_patterns {
        if let Some(start_idx) = xml.find(start) {
            let content_start = start_idx + start.len();
            let search_from = &xml[content_start..];
            let end_idx = search_from.find(&end_tag).or_else(|| {
                // prefixed closing tag, e.g. </sf:faultcode>
                let suffix = format!(":{}>", tag);
                let at = search_from.find(&suffix)?;
                search_from[..at].rfind("</")
            })?;
            return Some(unescape_xml(search_from[..end_idx].trim()));
        }
    }
    None
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
