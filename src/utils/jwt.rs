use base64::Engine as _;
use serde_json::Value;

/// Decode the claims segment of a JWT.
///
/// No signature check: the token came straight from the token endpoint over TLS.
pub(crate) fn decode_jwt_claims(jwt: &str) -> Option<Value> {
    let payload_b64 = jwt.split('.').nth(1)?;

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(payload_b64))
        .ok()?;

    serde_json::from_slice(&bytes).ok()
}

/// The `email` claim of an OpenID Connect id token, if present and non-empty.
pub(crate) fn email_from_id_token(id_token: &str) -> Option<String> {
    decode_jwt_claims(id_token)?
        .get("email")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fake_jwt(claims: &Value) -> String {
        let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.sig",
            enc.encode(br#"{"alg":"RS256"}"#),
            enc.encode(claims.to_string())
        )
    }

    #[test]
    fn extracts_email_claim() {
        let jwt = fake_jwt(&json!({"sub": "1", "email": "couple@example.com"}));
        assert_eq!(
            email_from_id_token(&jwt).as_deref(),
            Some("couple@example.com")
        );
    }

    #[test]
    fn missing_or_garbled_claims_yield_none() {
        assert_eq!(email_from_id_token(&fake_jwt(&json!({"sub": "1"}))), None);
        assert_eq!(email_from_id_token("not-a-jwt"), None);
    }
}
