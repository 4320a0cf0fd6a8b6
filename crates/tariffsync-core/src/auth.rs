//! OAuth access tokens for the Sheets API.
//!
//! A service account signs a short-lived RS256 assertion and trades it at the token
//! endpoint for a bearer token (the JWT-bearer grant). Tokens are cached and minted
//! again shortly before they expire, so a long-running scheduler never sends a stale one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::error::ClassifiedError;
use crate::http_client::HttpRequest;
use crate::resilient::ResilientClient;
use crate::retry::RetryPolicy;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3_600;
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3_600);
/// Tokens are replaced this long before the endpoint says they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Source of bearer tokens for outgoing Sheets requests.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, ClassifiedError>> + Send + 'a>>;
}

/// A token minted elsewhere; it is never refreshed.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl AccessTokenProvider for StaticToken {
    fn access_token<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, ClassifiedError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.0.clone()) })
    }
}

/// Service-account identity: the account email and its RSA signing key.
#[derive(Clone)]
pub struct ServiceAccountKey {
    client_email: String,
    signing_key: EncodingKey,
}

impl ServiceAccountKey {
    /// Build from the raw `GOOGLE_PRIVATE_KEY` value; see [`normalize_private_key`].
    ///
    /// # Errors
    ///
    /// `Validation` when the key is not a PEM-encoded RSA private key.
    pub fn new(client_email: impl Into<String>, private_key: &str) -> Result<Self, ClassifiedError> {
        let pem = normalize_private_key(private_key);
        let signing_key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|error| {
            ClassifiedError::validation(format!("GOOGLE_PRIVATE_KEY is not a usable RSA key: {error}"))
        })?;
        Ok(Self {
            client_email: client_email.into(),
            signing_key,
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }
}

/// Accept a PEM with real newlines, with literal `\n` escapes, or base64-encoded.
pub fn normalize_private_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.contains("-----BEGIN") {
        let decoded = STANDARD
            .decode(trimmed)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|text| text.contains("PRIVATE KEY-----"));
        if let Some(pem) = decoded {
            return pem.replace("\\n", "\n");
        }
    }
    trimmed.replace("\\n", "\n")
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Mints tokens from a [`ServiceAccountKey`] and reuses them until shortly before expiry.
pub struct ServiceAccountTokenProvider {
    client: ResilientClient,
    key: ServiceAccountKey,
    policy: RetryPolicy,
    token_uri: String,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    pub fn new(client: ResilientClient, key: ServiceAccountKey, policy: RetryPolicy) -> Self {
        Self {
            client,
            key,
            policy,
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            scope: SHEETS_SCOPE.to_string(),
            cached: Mutex::new(None),
        }
    }

    /// Exchange assertions at a different token endpoint.
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    fn signed_assertion(&self, issued_at: i64) -> Result<String, ClassifiedError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key.signing_key)
            .map_err(|error| ClassifiedError::internal(format!("could not sign token assertion: {error}")))
    }

    async fn mint(&self) -> Result<CachedToken, ClassifiedError> {
        let assertion = self.signed_assertion(OffsetDateTime::now_utc().unix_timestamp())?;
        let request = HttpRequest::post(self.token_uri.as_str())
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(format!(
                "grant_type={}&assertion={}",
                urlencoding::encode(JWT_BEARER_GRANT),
                urlencoding::encode(&assertion)
            ));

        let requested_at = Instant::now();
        let payload = self.client.execute(&request, &self.policy).await?;
        let token: TokenResponse = serde_json::from_value(payload).map_err(|error| {
            ClassifiedError::internal(format!("unexpected token endpoint response: {error}"))
        })?;

        let lifetime = token
            .expires_in
            .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);
        tracing::debug!(
            client_email = %self.key.client_email,
            expires_in_secs = lifetime.as_secs(),
            "minted sheets access token"
        );
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: requested_at + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }

    fn cached_token(&self) -> Option<String> {
        let cached = self.cached.lock().expect("token cache mutex poisoned");
        cached
            .as_ref()
            .filter(|token| Instant::now() < token.refresh_at)
            .map(|token| token.value.clone())
    }
}

impl AccessTokenProvider for ServiceAccountTokenProvider {
    fn access_token<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, ClassifiedError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(token) = self.cached_token() {
                return Ok(token);
            }
            let fresh = self.mint().await?;
            let value = fresh.value.clone();
            *self.cached.lock().expect("token cache mutex poisoned") = Some(fresh);
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::http_client::{HttpMethod, HttpResponse, ScriptedHttpClient, ScriptedReply};
    use jsonwebtoken::{DecodingKey, Validation};
    use serde_json::Value;
    use std::sync::Arc;

    const PRIVATE_KEY: &str = include_str!("../testdata/service_account_key.pem");
    const PUBLIC_KEY: &str = include_str!("../testdata/service_account_key.pub.pem");
    const TOKEN_URI: &str = "https://oauth.test/token";

    fn provider(transport: &ScriptedHttpClient) -> ServiceAccountTokenProvider {
        let key = ServiceAccountKey::new("mirror@tariffs.iam.gserviceaccount.com", PRIVATE_KEY)
            .expect("test key");
        ServiceAccountTokenProvider::new(
            ResilientClient::new(Arc::new(transport.clone())),
            key,
            RetryPolicy::no_retry(Duration::from_secs(5)),
        )
        .with_token_uri(TOKEN_URI)
    }

    fn token_reply(token: &str, expires_in: u64) -> ScriptedReply {
        ScriptedReply::Response(HttpResponse::ok_json(format!(
            r#"{{"access_token":"{token}","expires_in":{expires_in},"token_type":"Bearer"}}"#
        )))
    }

    fn form_field(body: &str, name: &str) -> Option<String> {
        body.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key != name {
                return None;
            }
            urlencoding::decode(value).ok().map(|value| value.into_owned())
        })
    }

    #[test]
    fn escaped_and_base64_keys_become_plain_pem() {
        let escaped = PRIVATE_KEY.trim().replace('\n', "\\n");
        let encoded = STANDARD.encode(PRIVATE_KEY);

        assert_eq!(normalize_private_key(&escaped), PRIVATE_KEY.trim());
        assert_eq!(normalize_private_key(&encoded).trim(), PRIVATE_KEY.trim());
        assert_eq!(normalize_private_key(PRIVATE_KEY), PRIVATE_KEY.trim());
        assert!(ServiceAccountKey::new("a@b", &escaped).is_ok());
        assert!(ServiceAccountKey::new("a@b", &encoded).is_ok());
    }

    #[test]
    fn unusable_keys_are_validation_errors() {
        let error = ServiceAccountKey::new("a@b", "not-a-key")
            .err()
            .expect("rejected");
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn assertion_is_signed_for_the_sheets_scope() {
        let transport = ScriptedHttpClient::always(token_reply("ya29.first", 3_600));

        let token = provider(&transport).access_token().await.expect("token");

        assert_eq!(token, "ya29.first");
        let request = &transport.requests()[0];
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, TOKEN_URI);
        assert_eq!(
            request.headers.get("content-type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );
        let body = request.body.as_deref().expect("form body");
        assert_eq!(form_field(body, "grant_type").as_deref(), Some(JWT_BEARER_GRANT));

        let assertion = form_field(body, "assertion").expect("assertion");
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[TOKEN_URI]);
        let decoded = jsonwebtoken::decode::<Value>(
            &assertion,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).expect("public key"),
            &validation,
        )
        .expect("assertion verifies");
        assert_eq!(decoded.claims["iss"], "mirror@tariffs.iam.gserviceaccount.com");
        assert_eq!(decoded.claims["scope"], SHEETS_SCOPE);
        let lifetime = decoded.claims["exp"].as_i64().zip(decoded.claims["iat"].as_i64());
        assert_eq!(lifetime.map(|(exp, iat)| exp - iat), Some(3_600));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_are_reused_until_shortly_before_expiry() {
        let transport = ScriptedHttpClient::new();
        transport
            .push(token_reply("ya29.first", 3_600))
            .push(token_reply("ya29.second", 3_600));
        let provider = provider(&transport);

        assert_eq!(provider.access_token().await.expect("mint"), "ya29.first");
        tokio::time::advance(Duration::from_secs(3_500)).await;
        assert_eq!(provider.access_token().await.expect("cached"), "ya29.first");
        assert_eq!(transport.request_count(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(provider.access_token().await.expect("refresh"), "ya29.second");
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_grants_surface_the_status() {
        let transport = ScriptedHttpClient::always(ScriptedReply::Response(HttpResponse::new(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid JWT Signature."}"#,
        )));

        let error = provider(&transport).access_token().await.expect_err("rejected");

        assert_eq!(error.status(), Some(400));
        assert_eq!(error.kind(), ErrorKind::UpstreamRejected);
    }
}
