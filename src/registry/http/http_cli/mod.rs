mod authentication_flow;
mod private_impl;

use std::sync::Arc;
use std::time::Duration;

use http::Response;
use http::Uri;

use hyper::Body;
use tokio::sync::Mutex;

use crate::error::{FreshnessError, Result};
use crate::http_client::{with_timeout, HyperClient};
use crate::registry::{CredentialProvider, Credentials};

use self::authentication_flow::basic_authorization;
use self::private_impl::{run_single_request, Challenge, RequestFailType};

const MAX_REDIRECTS: usize = 5;

// https://raw.githubusercontent.com/google/go-containerregistry/main/images/credhelper-basic.svg
pub struct HttpCli {
    pub inner_client: HyperClient,
    /// Registry domain as credentials are keyed, e.g. `docker.io`.
    pub host: String,
    /// Scope requested when a bearer challenge does not name one.
    pub default_scope: String,
    pub credentials: Arc<dyn CredentialProvider>,
    pub authorization: Arc<Mutex<Option<String>>>,
    pub request_timeout: Duration,
}

impl HttpCli {
    /// Issues a body-less request, following redirects and answering at most
    /// one authentication challenge. Nothing is retried.
    pub async fn request<F>(&self, uri: &Uri, configure_request_builder: F) -> Result<Response<Body>>
    where
        F: Fn(http::request::Builder) -> http::request::Builder + Send + Sync,
    {
        let origin = uri.authority().cloned();
        let mut uri = uri.clone();
        let mut redirects = 0;
        let mut authenticated = false;
        loop {
            // Credentials only ever go to the host we were asked to talk to.
            let same_origin = uri.authority() == origin.as_ref();
            let authorization = if same_origin {
                self.authorization.lock().await.clone()
            } else {
                None
            };
            let attempt = with_timeout(self.request_timeout, &uri, async {
                Ok(run_single_request(
                    authorization,
                    &uri,
                    &configure_request_builder,
                    &self.inner_client,
                )
                .await)
            })
            .await?;

            match attempt {
                Ok(o) => return Ok(o),
                Err(RequestFailType::Redirection(new_url)) => {
                    redirects += 1;
                    if redirects > MAX_REDIRECTS {
                        return Err(FreshnessError::transport(
                            &uri,
                            format!("gave up after {} redirects", MAX_REDIRECTS),
                        ));
                    }
                    uri = resolve_location(&uri, &new_url)?;
                    tracing::debug!("Following redirect to {}", uri);
                }
                Err(RequestFailType::AuthFailure(_)) if !same_origin => {
                    return Err(FreshnessError::AuthError {
                        host: self.host.clone(),
                        reason: format!("redirect target {} demanded credentials", uri),
                    });
                }
                Err(RequestFailType::AuthFailure(challenge)) => {
                    if authenticated {
                        return Err(FreshnessError::AuthError {
                            host: self.host.clone(),
                            reason: format!("registry rejected our credentials for {}", uri),
                        });
                    }
                    let header = self.answer_challenge(&challenge).await?;
                    *self.authorization.lock().await = Some(header);
                    authenticated = true;
                }
                Err(e @ RequestFailType::ConnectError(_))
                | Err(e @ RequestFailType::HyperError(_))
                | Err(e @ RequestFailType::AnyhowError(_)) => {
                    return Err(FreshnessError::transport(&uri, e));
                }
            }
        }
    }

    async fn answer_challenge(&self, challenge: &Challenge) -> Result<String> {
        let auth_error = |reason: String| FreshnessError::AuthError {
            host: self.host.clone(),
            reason,
        };
        let credentials = self
            .credentials
            .credentials(&self.host)
            .map_err(|e| auth_error(format!("unable to load credentials: {:#}", e)))?;

        match challenge {
            Challenge::Bearer(bearer) => {
                tracing::debug!("Requesting bearer token for {} from {}", self.host, bearer);
                let response = authentication_flow::authenticate_request(
                    bearer,
                    &self.default_scope,
                    &credentials,
                    &self.inner_client,
                )
                .await
                .map_err(|e| auth_error(format!("{:#}", e)))?;
                let token = response
                    .bearer_token()
                    .ok_or_else(|| auth_error("token endpoint returned no token".to_string()))?;
                Ok(format!("Bearer {}", token))
            }
            Challenge::Basic { realm } => match credentials {
                Credentials::Basic { username, password } => {
                    Ok(basic_authorization(&username, &password))
                }
                _ => Err(auth_error(format!(
                    "realm {:?} requires basic credentials and none are configured",
                    realm.as_deref().unwrap_or_default()
                ))),
            },
        }
    }
}

// Location headers may be relative to the uri that produced them.
fn resolve_location(current: &Uri, location: &str) -> Result<Uri> {
    let location_uri = location
        .parse::<Uri>()
        .map_err(|e| FreshnessError::transport(current, format!("bad redirect {:?}: {}", location, e)))?;
    if location_uri.host().is_some() {
        return Ok(location_uri);
    }
    let mut parts = current.clone().into_parts();
    parts.path_and_query = location_uri.path_and_query().cloned();
    Uri::from_parts(parts).map_err(|e| {
        FreshnessError::transport(current, format!("bad redirect {:?}: {}", location, e))
    })
}
