//! Error types for the cover cache proxy

use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    Io(Box<std::io::Error>),
    Fetcher(cover_cache::FetchError),
    Config(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Io(err) => write!(f, "IO error: {}", err),
            ProxyError::Fetcher(err) => write!(f, "Fetcher setup error: {}", err),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Io(err) => Some(err.as_ref()),
            ProxyError::Fetcher(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(Box::new(err))
    }
}

impl From<cover_cache::FetchError> for ProxyError {
    fn from(err: cover_cache::FetchError) -> Self {
        ProxyError::Fetcher(err)
    }
}

impl From<tracing_subscriber::filter::ParseError> for ProxyError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ProxyError::Config("bad STORE_VERSION".to_string());
        assert_eq!(format!("{}", err), "Configuration error: bad STORE_VERSION");
    }

    #[test]
    fn test_fetcher_error_display() {
        let err = ProxyError::Fetcher(cover_cache::FetchError::InvalidUrl("x".to_string()));
        assert!(format!("{}", err).contains("Invalid URL: x"));
    }

    #[test]
    fn test_io_error_source() {
        let err: ProxyError =
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken").into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
