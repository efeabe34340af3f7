//! Resolution of the backend database's socket address.

use crate::error::ConfigurationError;

use serde::Deserialize;
use std::path::Path;
use url::{form_urlencoded, Url};

/// How to reach the backend database: either an explicit host and port, or a DSN
/// carrying them as `host` and `port` query parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BackendSpec {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub dsn: Option<String>,
}

/// Parse a query string, failing on any field that isn't a `key=value` pair.
///
/// Fields with an empty value are dropped.
fn parse_query_strict(query: &str) -> Result<Vec<(String, String)>, ConfigurationError> {
    let mut pairs = Vec::new();

    for field in query.split('&') {
        if field.is_empty() || !field.contains('=') {
            return Err(ConfigurationError::MalformedDsnQuery(field.to_owned()));
        }

        for (name, value) in form_urlencoded::parse(field.as_bytes()) {
            if !value.is_empty() {
                pairs.push((name.into_owned(), value.into_owned()));
            }
        }
    }

    Ok(pairs)
}

fn last_value(pairs: &[(String, String)], name: &str) -> Option<String> {
    pairs
        .iter()
        .rev()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}

/// Derive the backend's socket address, `<host>/.s.PGSQL.<port>`.
///
/// The DSN is consulted only when no explicit host is given. Repeated `host` or
/// `port` parameters in it resolve to their last occurrence.
pub fn resolve_backend_address(spec: &BackendSpec) -> Result<String, ConfigurationError> {
    let (host, port) = match (&spec.host, &spec.dsn) {
        (None, Some(dsn)) => {
            let url = Url::parse(dsn)?;
            let pairs = match url.query() {
                Some(query) => parse_query_strict(query)?,
                None => Vec::new(),
            };
            (last_value(&pairs, "host"), last_value(&pairs, "port"))
        }
        _ => (spec.host.clone(), spec.port.map(|p| p.to_string())),
    };

    let host = host
        .filter(|h| !h.is_empty())
        .ok_or(ConfigurationError::MissingBackendField("host"))?;
    let port = port.ok_or(ConfigurationError::MissingBackendField("port"))?;

    Ok(Path::new(&host)
        .join(format!(".s.PGSQL.{}", port))
        .to_string_lossy()
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dsn(dsn: &str) -> BackendSpec {
        BackendSpec {
            dsn: Some(dsn.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn explicit_host_ignores_dsn() {
        let spec = BackendSpec {
            host: Some("/run/postgres".to_string()),
            port: Some(5432),
            dsn: Some("postgres:///?host=/elsewhere&port=1".to_string()),
        };
        assert_eq!(
            resolve_backend_address(&spec).unwrap(),
            "/run/postgres/.s.PGSQL.5432"
        );
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let spec = BackendSpec {
            host: Some("/tmp/".to_string()),
            port: Some(5433),
            dsn: None,
        };
        assert_eq!(resolve_backend_address(&spec).unwrap(), "/tmp/.s.PGSQL.5433");
    }

    #[test]
    fn dsn_host_and_port() {
        let spec = dsn("postgres:///db?host=/var/run/pg&port=5432");
        assert_eq!(
            resolve_backend_address(&spec).unwrap(),
            "/var/run/pg/.s.PGSQL.5432"
        );
    }

    #[test]
    fn dsn_last_occurrence_wins() {
        let spec = dsn("postgres:///db?host=/first&port=1&host=/second&port=2");
        assert_eq!(resolve_backend_address(&spec).unwrap(), "/second/.s.PGSQL.2");
    }

    #[test]
    fn dsn_percent_encoded_host() {
        let spec = dsn("postgres:///db?host=%2Frun%2Fpg&port=6000");
        assert_eq!(resolve_backend_address(&spec).unwrap(), "/run/pg/.s.PGSQL.6000");
    }

    #[test]
    fn dsn_malformed_query_fails() {
        let spec = dsn("postgres:///db?host=/tmp&&port=5432");
        assert!(matches!(
            resolve_backend_address(&spec),
            Err(ConfigurationError::MalformedDsnQuery(_))
        ));

        let spec = dsn("postgres:///db?host=/tmp&port");
        assert!(matches!(
            resolve_backend_address(&spec),
            Err(ConfigurationError::MalformedDsnQuery(f)) if f == "port"
        ));
    }

    #[test]
    fn dsn_missing_parameters_fail() {
        assert!(matches!(
            resolve_backend_address(&dsn("postgres:///db?port=5432")),
            Err(ConfigurationError::MissingBackendField("host"))
        ));
        assert!(matches!(
            resolve_backend_address(&dsn("postgres:///db?host=/tmp&port=")),
            Err(ConfigurationError::MissingBackendField("port"))
        ));
        assert!(matches!(
            resolve_backend_address(&dsn("postgres:///db")),
            Err(ConfigurationError::MissingBackendField("host"))
        ));
    }

    #[test]
    fn invalid_dsn_fails() {
        assert!(matches!(
            resolve_backend_address(&dsn("not a uri")),
            Err(ConfigurationError::InvalidDsn(_))
        ));
    }

    #[test]
    fn empty_spec_fails() {
        assert!(matches!(
            resolve_backend_address(&BackendSpec::default()),
            Err(ConfigurationError::MissingBackendField("host"))
        ));
    }
}
