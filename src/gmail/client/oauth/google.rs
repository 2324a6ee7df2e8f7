use crate::config::GmailConfig;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, EndpointNotSet, EndpointSet, ExtraTokenFields, RedirectUrl,
    StandardRevocableToken, StandardTokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};

/// Google adds an OpenID `id_token` to the consent response; its `email` claim is the mailbox.
#[derive(Clone, Default, Deserialize, Serialize)]
pub(crate) struct GoogleTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for GoogleTokenFields {}

impl std::fmt::Debug for GoogleTokenFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleTokenFields")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub(crate) type GoogleTokenResponse = StandardTokenResponse<GoogleTokenFields, BasicTokenType>;

pub(crate) type GoogleOauth2Client = oauth2::Client<
    BasicErrorResponse,
    GoogleTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Client for the consent and refresh grants against the configured Google endpoints.
///
/// Built per call so tests can point the token endpoint at a local server.
pub(crate) fn google_client(cfg: &GmailConfig) -> GoogleOauth2Client {
    let client = oauth2::Client::<
        BasicErrorResponse,
        GoogleTokenResponse,
        BasicTokenIntrospectionResponse,
        StandardRevocableToken,
        BasicRevocationErrorResponse,
    >::new(ClientId::new(cfg.oauth_client_id.clone()));
    let client = if cfg.oauth_client_secret.is_empty() {
        client
    } else {
        client.set_client_secret(ClientSecret::new(cfg.oauth_client_secret.clone()))
    };

    client
        .set_auth_uri(AuthUrl::from_url(cfg.oauth_auth_url.clone()))
        .set_token_uri(TokenUrl::from_url(cfg.oauth_token_url.clone()))
        .set_redirect_uri(RedirectUrl::from_url(cfg.oauth_redirect_url.clone()))
}
