use reqwest::Method;
use url::Url;
use vowmail_schema::WatchRequest;

/// Gmail REST operations used by this service, all against `users/me`.
#[derive(Debug, Clone)]
pub enum GmailOperation {
    Watch(WatchRequest),
    Stop,
    GetProfile,
}

impl GmailOperation {
    pub fn name(&self) -> &'static str {
        match self {
            GmailOperation::Watch(_) => "watch",
            GmailOperation::Stop => "stop",
            GmailOperation::GetProfile => "profile",
        }
    }

    fn method(&self) -> Method {
        match self {
            GmailOperation::Watch(_) | GmailOperation::Stop => Method::POST,
            GmailOperation::GetProfile => Method::GET,
        }
    }
}

pub struct GmailApi;

impl GmailApi {
    pub fn url_for(api_url: &Url, op: &GmailOperation) -> String {
        format!(
            "{}/gmail/v1/users/me/{}",
            api_url.as_str().trim_end_matches('/'),
            op.name()
        )
    }

    /// One authorized request; no retries and no status handling.
    pub async fn send(
        client: &reqwest::Client,
        api_url: &Url,
        token: impl AsRef<str>,
        op: &GmailOperation,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let req = client
            .request(op.method(), Self::url_for(api_url, op))
            .bearer_auth(token.as_ref());

        let req = match op {
            GmailOperation::Watch(body) => req.json(body),
            GmailOperation::Stop => req.header(reqwest::header::CONTENT_LENGTH, 0),
            GmailOperation::GetProfile => req,
        };

        req.send().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_under_users_me() {
        let base = Url::parse("http://127.0.0.1:9999/").unwrap();
        assert_eq!(
            GmailApi::url_for(&base, &GmailOperation::GetProfile),
            "http://127.0.0.1:9999/gmail/v1/users/me/profile"
        );
        assert_eq!(
            GmailApi::url_for(&base, &GmailOperation::Stop),
            "http://127.0.0.1:9999/gmail/v1/users/me/stop"
        );
    }
}
