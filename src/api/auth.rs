//! Login endpoint

use serde::Deserialize;

use super::client::{check_status, ApiError};
use crate::models::CurrentUser;

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "access")]
    pub token: String,
    pub user: CurrentUser,
}

/// Exchange credentials for a bearer token. Not authenticated itself.
pub async fn login(api_base: &str, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
    let url = format!("{}/auth/login/", api_base.trim_end_matches('/'));
    tracing::debug!("POST {}", url);

    let resp = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({ "email": email, "password": password }))
        .send()
        .await
        .map_err(|source| ApiError::Request {
            url: url.clone(),
            source,
        })?;

    let resp = check_status(resp, &url).await?;
    resp.json()
        .await
        .map_err(|source| ApiError::Decode { url, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_accepts_access_alias() {
        let resp: LoginResponse = serde_json::from_value(serde_json::json!({
            "access": "jwt",
            "user": {"id": 5, "name": "Ana", "role": "admin"}
        }))
        .unwrap();
        assert_eq!(resp.token, "jwt");
        assert_eq!(resp.user.id, "5");
        assert!(resp.user.is_admin());
    }
}
