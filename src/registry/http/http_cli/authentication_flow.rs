use anyhow::Context;

use http::Uri;

use serde::{Deserialize, Serialize};

use crate::http_client::{dump_body_to_string, HyperClient};
use crate::registry::Credentials;

use super::private_impl::{run_single_request, BearerConfig};

// Sent as client_id when exchanging identity tokens.
const CLIENT_ID: &str = "image-freshness";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: Option<String>,
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
    pub issued_at: Option<String>,
}

impl AuthResponse {
    pub fn bearer_token(&self) -> Option<&str> {
        self.token.as_deref().or(self.access_token.as_deref())
    }
}

pub fn basic_authorization(username: &str, password: &str) -> String {
    use base64::prelude::*;
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{}:{}", username, password))
    )
}

fn realm_with_query(realm: &Uri, new_query_items: &str) -> anyhow::Result<Uri> {
    let mut parts = realm.clone().into_parts();
    let existing_path_and_query = parts
        .path_and_query
        .as_ref()
        .map(|e| e.as_str())
        .unwrap_or("");
    let new_path_q = if new_query_items.is_empty() {
        existing_path_and_query.to_string()
    } else if existing_path_and_query.contains('?') {
        format!("{}&{}", existing_path_and_query, new_query_items)
    } else {
        format!("{}?{}", existing_path_and_query, new_query_items)
    };
    parts.path_and_query = Some(
        new_path_q
            .as_str()
            .try_into()
            .with_context(|| format!("Failed to parse path and query from {:?}", new_path_q))?,
    );
    Uri::from_parts(parts).with_context(|| {
        format!(
            "Failed to parse uri from installing new path and query of {}",
            new_path_q
        )
    })
}

fn token_query(service: &str, scope: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("service", service)
        .append_pair("scope", scope)
        .finish()
}

fn refresh_token_form(refresh_token: &str, service: &str, scope: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", "refresh_token")
        .append_pair("refresh_token", refresh_token)
        .append_pair("service", service)
        .append_pair("scope", scope)
        .append_pair("client_id", CLIENT_ID)
        .finish()
}

/// Obtains a bearer token from the challenge's realm.
///
/// Anonymous and basic credentials use the token GET endpoint; identity
/// tokens are exchanged through the OAuth2 refresh-token POST.
pub async fn authenticate_request(
    auth_fail: &BearerConfig,
    default_scope: &str,
    credentials: &Credentials,
    inner_client: &HyperClient,
) -> anyhow::Result<AuthResponse> {
    let scope = auth_fail.scope.as_deref().unwrap_or(default_scope);

    let mut response = match credentials {
        Credentials::IdentityToken(refresh_token) => {
            let form = refresh_token_form(refresh_token, &auth_fail.service, scope);
            let request = http::request::Builder::default()
                .method(http::Method::POST)
                .uri(auth_fail.realm.clone())
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(hyper::Body::from(form))?;
            inner_client.request(request).await.with_context(|| {
                format!(
                    "Failed to exchange identity token with {:?}",
                    auth_fail.realm
                )
            })?
        }
        Credentials::Basic { .. } | Credentials::Anonymous => {
            let new_uri = realm_with_query(&auth_fail.realm, &token_query(&auth_fail.service, scope))?;
            let authorization = match credentials {
                Credentials::Basic { username, password } => {
                    Some(basic_authorization(username, password))
                }
                _ => None,
            };
            run_single_request(
                authorization,
                &new_uri,
                &|b: http::request::Builder| b.method(http::Method::GET),
                inner_client,
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to run new request to try authenticate to {:?}",
                    new_uri
                )
            })?
        }
    };

    if response.status().is_success() {
        let response_body = dump_body_to_string(&mut response).await?;
        let response_auth_info: AuthResponse = serde_json::from_str(&response_body)
            .with_context(|| format!("Token endpoint returned unexpected body:\n{}", response_body))?;
        if response_auth_info.bearer_token().is_none() {
            anyhow::bail!("Token endpoint {:?} returned no token", auth_fail.realm);
        }
        Ok(response_auth_info)
    } else {
        let try_response_body = dump_body_to_string(&mut response)
            .await
            .unwrap_or_default();
        anyhow::bail!(
            "Failed to authenticate to {:?}, got status code: {:?}, body:\n{}",
            auth_fail.realm,
            response.status(),
            try_response_body
        );
    }
}
