use crate::drive::{DriveApi, DriveClient};
use crate::{config::Config, error::AppError, error::Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// Tokens this close to expiry are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 60;

const SUCCESS_PAGE: &str = "The authentication flow has completed. You may close this window.";

/// OAuth2 client registration read from the operator-provided secret file.
///
/// Google ships these files with either an `installed` or a `web` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

fn default_auth_uri() -> String {
    String::from("https://accounts.google.com/o/oauth2/auth")
}

fn default_token_uri() -> String {
    String::from("https://oauth2.googleapis.com/token")
}

impl ClientSecret {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Auth(format!("cannot read client secret {}: {}", path.display(), e))
        })?;
        let file: ClientSecretFile = serde_json::from_str(&raw)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| AppError::Auth("client secret has no installed or web section".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Valid,
    Expired,
    Absent,
}

/// Persisted authorization for the storage provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(alias = "token")]
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
}

impl Credential {
    /// Reads the token file. A missing or unreadable file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!("Ignoring unreadable token file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!("Credential persisted to {:?}", path);
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry
            .map(|expiry| expiry - Duration::seconds(EXPIRY_SKEW_SECS) <= now)
            .unwrap_or(false)
    }

    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// Validity of an optional credential for the requested scopes.
pub fn credential_state(credential: Option<&Credential>, scopes: &[String], now: DateTime<Utc>) -> CredentialState {
    match credential {
        None => CredentialState::Absent,
        Some(credential) if !credential.covers(scopes) => CredentialState::Absent,
        Some(credential) if credential.is_expired(now) => CredentialState::Expired,
        Some(_) => CredentialState::Valid,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Anything able to hand out an authorized Drive session.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn authorize(&self) -> Result<Box<dyn DriveApi>>;
}

/// Obtains Google Drive credentials, interactively when needed.
pub struct Authenticator {
    http: reqwest::Client,
    config: Arc<Config>,
}

impl Authenticator {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Returns a usable credential, persisting it whenever it changed.
    ///
    /// # Details
    /// 1. Reuses the token file when it is valid for the configured scopes
    /// 2. Refreshes an expired token that carries a refresh token
    /// 3. Otherwise runs the installed-app consent flow in the browser
    #[instrument(skip(self))]
    pub async fn credential(&self) -> Result<Credential> {
        let token_file = &self.config.token_file;
        let stored = Credential::load(token_file)?;

        match credential_state(stored.as_ref(), &self.config.scopes, Utc::now()) {
            CredentialState::Valid => {
                info!("Reusing stored credential");
                return stored.ok_or_else(|| AppError::Auth("credential vanished".into()));
            }
            CredentialState::Expired => {
                if let Some(credential) = stored.as_ref().filter(|c| c.refresh_token.is_some()) {
                    match self.refresh(credential).await {
                        Ok(refreshed) => {
                            refreshed.save(token_file)?;
                            return Ok(refreshed);
                        }
                        Err(e) => warn!("Token refresh failed, re-authorizing: {}", e),
                    }
                }
            }
            CredentialState::Absent => {}
        }

        let secret = ClientSecret::from_file(&self.config.client_secret_file)?;
        self.authorize_interactively(&secret).await
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| AppError::Auth("no refresh token".into()))?;
        let params = [
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let token = self.request_token(&credential.token_uri, &params).await?;

        Ok(Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or_else(|| credential.refresh_token.clone()),
            expiry: expiry_from(token.expires_in),
            scopes: token
                .scope
                .map(|scope| split_scopes(&scope))
                .unwrap_or_else(|| credential.scopes.clone()),
            ..credential.clone()
        })
    }

    async fn authorize_interactively(&self, secret: &ClientSecret) -> Result<Credential> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let state = new_state();
        let redirect_uri = redirect_uri_for(&listener)?;

        let scope = self.config.scopes.join(" ");
        let auth_url = Url::parse_with_params(
            &secret.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", secret.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state.as_str()),
            ],
        )?;

        println!("Please visit this URL to authorize this application: {}", auth_url);
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!("Could not open a browser: {}", e);
        }

        self.complete_consent(&listener, &state, secret).await
    }

    /// Waits for the consent redirect on `listener`, exchanges the code and
    /// persists the resulting credential before returning it.
    pub async fn complete_consent(
        &self,
        listener: &TcpListener,
        state: &str,
        secret: &ClientSecret,
    ) -> Result<Credential> {
        let redirect_uri = redirect_uri_for(listener)?;
        let code = receive_code(listener, state).await?;
        let params = [
            ("code", code.as_str()),
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let token = self.request_token(&secret.token_uri, &params).await?;

        let credential = Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry: expiry_from(token.expires_in),
            scopes: token
                .scope
                .map(|scope| split_scopes(&scope))
                .unwrap_or_else(|| self.config.scopes.clone()),
            client_id: secret.client_id.clone(),
            client_secret: secret.client_secret.clone(),
            token_uri: secret.token_uri.clone(),
        };
        credential.save(&self.config.token_file)?;
        Ok(credential)
    }

    async fn request_token(&self, token_uri: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self.http.post(token_uri).form(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!("token endpoint returned {}: {}", status, body)));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SessionProvider for Authenticator {
    async fn authorize(&self) -> Result<Box<dyn DriveApi>> {
        let credential = self.credential().await?;
        Ok(Box::new(DriveClient::new(credential.access_token)?))
    }
}

/// Serves the loopback redirect until a request carries a code or an error.
async fn receive_code(listener: &TcpListener, state: &str) -> Result<String> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("Redirect connection from {}", peer);

        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        // Drain the headers so closing the socket does not reset the connection.
        let mut header = String::new();
        while reader.read_line(&mut header).await? > 2 {
            header.clear();
        }

        let outcome = parse_redirect(&request_line, state);
        let body = match &outcome {
            Some(Ok(_)) => SUCCESS_PAGE.to_string(),
            Some(Err(e)) => e.to_string(),
            None => String::new(),
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        reader.get_mut().write_all(response.as_bytes()).await?;

        if let Some(outcome) = outcome {
            return outcome;
        }
    }
}

/// Extracts the authorization code from a redirect request line such as
/// `GET /?state=..&code=.. HTTP/1.1`.
///
/// Returns `None` for unrelated requests (a browser fetching `/favicon.ico`).
pub fn parse_redirect(request_line: &str, expected_state: &str) -> Option<Result<String>> {
    let target = request_line.split_whitespace().nth(1)?;
    let url = Url::parse("http://localhost").ok()?.join(target).ok()?;

    let mut code = None;
    let mut error = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Some(Err(AppError::Auth(format!("authorization refused: {}", error))));
    }
    let code = code?;
    if state.as_deref() != Some(expected_state) {
        return Some(Err(AppError::Auth("authorization state mismatch".into())));
    }
    Some(Ok(code))
}

/// Unguessable value tying the redirect to the consent request.
pub fn new_state() -> String {
    Uuid::new_v4().simple().to_string()
}

fn redirect_uri_for(listener: &TcpListener) -> Result<String> {
    Ok(format!("http://localhost:{}/", listener.local_addr()?.port()))
}

fn expiry_from(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + Duration::seconds(secs))
}

fn split_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DRIVE: &str = "https://www.googleapis.com/auth/drive";

    fn credential(expiry: Option<DateTime<Utc>>, token_uri: &str) -> Credential {
        Credential {
            access_token: "old-access".into(),
            refresh_token: Some("refresh".into()),
            expiry,
            scopes: vec![DRIVE.into()],
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_uri: token_uri.into(),
        }
    }

    fn config_in(dir: &TempDir) -> Arc<Config> {
        Arc::new(Config {
            token_file: dir.path().join("token.json"),
            client_secret_file: dir.path().join("credentials.json"),
            ..Config::default()
        })
    }

    #[test]
    fn state_reflects_expiry_and_scopes() {
        let scopes = vec![DRIVE.to_string()];
        let now = Utc::now();

        assert_eq!(credential_state(None, &scopes, now), CredentialState::Absent);

        let fresh = credential(Some(now + Duration::hours(1)), "");
        assert_eq!(credential_state(Some(&fresh), &scopes, now), CredentialState::Valid);

        let almost = credential(Some(now + Duration::seconds(30)), "");
        assert_eq!(credential_state(Some(&almost), &scopes, now), CredentialState::Expired);

        let narrow = vec!["https://www.googleapis.com/auth/drive.file".to_string()];
        assert_eq!(credential_state(Some(&fresh), &narrow, now), CredentialState::Absent);
    }

    #[test]
    fn corrupt_token_file_counts_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Credential::load(&path).unwrap().is_none());
    }

    #[test]
    fn client_secret_accepts_web_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"web":{"client_id":"id","client_secret":"s"}}"#).unwrap();

        let secret = ClientSecret::from_file(&path).unwrap();
        assert_eq!(secret.client_id, "id");
        assert_eq!(secret.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn redirect_parsing() {
        let ok = parse_redirect("GET /?state=s1&code=4%2Fabc&scope=x HTTP/1.1\r\n", "s1");
        assert_eq!(ok.unwrap().unwrap(), "4/abc");

        let denied = parse_redirect("GET /?error=access_denied&state=s1 HTTP/1.1", "s1");
        assert!(matches!(denied, Some(Err(AppError::Auth(_)))));

        let forged = parse_redirect("GET /?state=other&code=c HTTP/1.1", "s1");
        assert!(matches!(forged, Some(Err(AppError::Auth(_)))));

        assert!(parse_redirect("GET /favicon.ico HTTP/1.1", "s1").is_none());
    }

    #[tokio::test]
    async fn valid_token_is_reused_without_network() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        credential(Some(Utc::now() + Duration::hours(1)), "http://127.0.0.1:9/token")
            .save(&config.token_file)
            .unwrap();

        let credential = Authenticator::new(config).credential().await.unwrap();
        assert_eq!(credential.access_token, "old-access");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"new-access","expires_in":3600,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let token_uri = format!("{}/token", server.url());
        credential(Some(Utc::now() - Duration::hours(1)), &token_uri)
            .save(&config.token_file)
            .unwrap();

        let credential = Authenticator::new(Arc::clone(&config)).credential().await.unwrap();

        refresh.assert_async().await;
        assert_eq!(credential.access_token, "new-access");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh"));
        let persisted = Credential::load(&config.token_file).unwrap().unwrap();
        assert_eq!(persisted.access_token, "new-access");
    }

    fn secret_for(token_uri: String) -> ClientSecret {
        ClientSecret {
            client_id: "id".into(),
            client_secret: "secret".into(),
            auth_uri: default_auth_uri(),
            token_uri,
        }
    }

    /// Plays the browser: follows the redirect to the loopback listener.
    fn redirect_browser(listener: &TcpListener, query: String) -> tokio::task::JoinHandle<String> {
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            let request = format!("GET /?{} HTTP/1.1\r\nHost: localhost\r\n\r\n", query);
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut page = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut page)
                .await
                .unwrap();
            page
        })
    }

    #[tokio::test]
    async fn consent_exchanges_code_and_persists_credential() {
        let mut server = mockito::Server::new_async().await;
        let exchange = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "4/granted".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","refresh_token":"r1","expires_in":3599,"scope":"https://www.googleapis.com/auth/drive"}"#)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let authenticator = Authenticator::new(Arc::clone(&config));
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let state = new_state();
        let browser = redirect_browser(&listener, format!("state={}&code=4%2Fgranted", state));

        let credential = authenticator
            .complete_consent(&listener, &state, &secret_for(format!("{}/token", server.url())))
            .await
            .unwrap();

        exchange.assert_async().await;
        assert_eq!(credential.access_token, "fresh");
        assert_eq!(credential.refresh_token.as_deref(), Some("r1"));
        assert!(browser.await.unwrap().contains(SUCCESS_PAGE));

        let persisted = Credential::load(&config.token_file).unwrap().unwrap();
        assert_eq!(persisted.access_token, "fresh");
        assert_eq!(persisted.scopes, vec![DRIVE.to_string()]);
    }

    #[tokio::test]
    async fn refused_consent_fails_without_token_exchange() {
        let mut server = mockito::Server::new_async().await;
        let exchange = server
            .mock("POST", "/token")
            .expect(0)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let authenticator = Authenticator::new(Arc::clone(&config));
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let state = new_state();
        let browser = redirect_browser(&listener, format!("error=access_denied&state={}", state));

        let err = authenticator
            .complete_consent(&listener, &state, &secret_for(format!("{}/token", server.url())))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Auth(_)));
        assert!(browser.await.unwrap().contains("access_denied"));
        exchange.assert_async().await;
        assert!(!config.token_file.exists());
    }

    #[test]
    fn states_are_random_and_opaque() {
        let first = new_state();
        let second = new_state();
        assert_ne!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn google_auth_token_file_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"{"token": "ya29.legacy", "refresh_token": "1//r", "token_uri": "https://oauth2.googleapis.com/token",
                "client_id": "id", "client_secret": "secret", "scopes": ["https://www.googleapis.com/auth/drive"],
                "universe_domain": "googleapis.com", "account": "", "expiry": "2030-01-01T00:00:00.000000Z"}"#,
        )
        .unwrap();

        let credential = Credential::load(&path).unwrap().unwrap();
        assert_eq!(credential.access_token, "ya29.legacy");
        assert_eq!(
            credential_state(Some(&credential), &[DRIVE.to_string()], Utc::now()),
            CredentialState::Valid
        );
    }

    #[tokio::test]
    async fn missing_client_secret_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = Authenticator::new(config_in(&dir)).credential().await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }
}
