use std::sync::OnceLock;

use anyhow::Context;
use http::Uri;
use http::{Response, StatusCode};

use hyper::Body;
use regex::Regex;

use crate::http_client::{header_str, HyperClient};

#[derive(Debug, Clone)]
pub struct BearerConfig {
    pub realm: Uri,
    pub service: String,
    pub scope: Option<String>,
}
impl std::fmt::Display for BearerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ realm: {}, service: {}, scope: {} }}",
            self.realm,
            self.service,
            self.scope.as_ref().map(|e| e.as_str()).unwrap_or("")
        )
    }
}

fn challenge_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // the csv thats used here the csv parsers i saw don't like
    // of the shape key="value",key="value3,e",y="value"
    RE.get_or_init(|| Regex::new(r#"(".*?"|[^",\s]+)"#).expect("challenge regex is valid"))
}

/// Splits the parameter list of a challenge into key/value pairs.
fn challenge_params(params: &str) -> anyhow::Result<Vec<(String, String)>> {
    // this will split into pairs of '{key}=' and 'value'
    let pairs: Vec<&str> = challenge_pair_regex()
        .captures_iter(params)
        .map(|e| {
            let (_, [m]) = e.extract();
            m
        })
        .collect();
    if (pairs.len() % 2) != 0 {
        anyhow::bail!("Invalid auth header, we attempted to split on csv, and expected an even key value pairs but got: {}; pairs: {:#?}", pairs.len(), pairs);
    }

    let mut out = Vec::with_capacity(pairs.len() / 2);
    for pair in pairs.chunks(2) {
        let (key, value) = (pair[0], pair[1]);
        let value = value.trim_matches('"');
        let key = if let Some(p) = key.strip_suffix('=') {
            p.trim_matches('"')
        } else {
            anyhow::bail!(
                "Invalid auth header, looking at part: '{}', we couldn't find a trailing '='",
                key
            );
        };
        out.push((key.to_ascii_lowercase(), value.to_string()));
    }
    Ok(out)
}

impl BearerConfig {
    pub fn from_auth_header(auth_header: &str) -> anyhow::Result<Self> {
        let mut realm = None;
        let mut scope = None;
        let mut service = None;

        let auth_header = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| anyhow::anyhow!("Invalid auth header"))?;

        for (key, value) in challenge_params(auth_header)? {
            match key.as_str() {
                "realm" => {
                    realm = Some(
                        value
                            .parse()
                            .with_context(|| format!("Failed to parse realm from {:?}", value))?,
                    )
                }
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => (),
            }
        }

        match (realm, service) {
            (Some(realm), Some(service)) => Ok(Self {
                realm,
                service,
                scope,
            }),
            _ => Err(anyhow::anyhow!("Invalid auth header")),
        }
    }
}

/// What a registry asked for in its `WWW-Authenticate` header.
#[derive(Debug, Clone)]
pub enum Challenge {
    Bearer(BearerConfig),
    Basic { realm: Option<String> },
}

impl Challenge {
    pub fn from_auth_header(auth_header: &str) -> anyhow::Result<Self> {
        if auth_header.starts_with("Bearer ") {
            return Ok(Challenge::Bearer(BearerConfig::from_auth_header(
                auth_header,
            )?));
        }
        if let Some(params) = auth_header.strip_prefix("Basic") {
            let realm = challenge_params(params.trim())?
                .into_iter()
                .find(|(k, _)| k == "realm")
                .map(|(_, v)| v);
            return Ok(Challenge::Basic { realm });
        }
        anyhow::bail!("Unsupported auth challenge '{}'", auth_header)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RequestFailType {
    #[error("Failed to connect: '{0}'")]
    ConnectError(hyper::Error),
    #[error("Generic hyper error: '{0}'")]
    HyperError(hyper::Error),
    #[error("Internal error: '{0:?}'")]
    AnyhowError(anyhow::Error),
    #[error("Auth required: '{0:?}'")]
    AuthFailure(Challenge),
    #[error("Got a redirection code: '{0}'")]
    Redirection(String),
}
impl From<anyhow::Error> for RequestFailType {
    fn from(e: anyhow::Error) -> Self {
        RequestFailType::AnyhowError(e)
    }
}

pub async fn run_single_request<F>(
    authorization: Option<String>,
    uri: &Uri,
    configure_request_builder: &F,
    inner_client: &HyperClient,
) -> Result<Response<Body>, RequestFailType>
where
    F: Fn(http::request::Builder) -> http::request::Builder + Send + Sync,
{
    let req_builder = http::request::Builder::default().uri(uri);
    let req_builder = if let Some(authorization) = authorization {
        req_builder.header(http::header::AUTHORIZATION, authorization)
    } else {
        req_builder
    };
    let request = configure_request_builder(req_builder)
        .body(Body::empty())
        .map_err(|e| RequestFailType::AnyhowError(e.into()))?;

    let r: Response<Body> = match inner_client.request(request).await {
        Err(e) => {
            if e.is_connect() {
                return Err(RequestFailType::ConnectError(e));
            } else {
                return Err(RequestFailType::HyperError(e));
            }
        }
        Ok(r) => {
            if r.status() == StatusCode::UNAUTHORIZED {
                if let Some(auth_header) = header_str(&r, "WWW-Authenticate") {
                    let challenge = Challenge::from_auth_header(auth_header).with_context(|| {
                        format!(
                            "unable to parse auth header when issuing request, got header '{}'",
                            auth_header
                        )
                    })?;
                    return Err(RequestFailType::AuthFailure(challenge));
                }
            }
            if r.status().is_redirection() {
                if let Some(location_str) = header_str(&r, http::header::LOCATION.as_str()) {
                    return Err(RequestFailType::Redirection(location_str.to_string()));
                }
            }
            r
        }
    };
    Ok(r)
}
