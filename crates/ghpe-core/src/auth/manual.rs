use url::Url;

use super::AuthError;

/// Code (and optional state) pasted back by the operator after authorizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: Option<String>,
}

/// Accept either a bare authorization code or the full redirect URL.
pub fn parse_authorization_input(input: &str) -> Result<AuthorizationResponse, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::InvalidAuthorizationResponse(
            "empty input".into(),
        ));
    }

    if let Ok(url) = Url::parse(input) {
        let mut code: Option<String> = None;
        let mut state: Option<String> = None;
        let mut error: Option<String> = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }
        if let Some(err) = error {
            return Err(AuthError::AccessDenied(err));
        }
        let code = code
            .filter(|code| !code.is_empty())
            .ok_or(AuthError::MissingAuthorizationCode)?;
        return Ok(AuthorizationResponse { code, state });
    }

    if input.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidAuthorizationResponse(
            "authorization code must not contain whitespace".into(),
        ));
    }

    Ok(AuthorizationResponse {
        code: input.to_owned(),
        state: None,
    })
}
