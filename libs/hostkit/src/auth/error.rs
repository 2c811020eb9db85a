use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classified authentication / authorization failure.
///
/// The `Display` text is what callers see in a 401 body, so it stays generic;
/// backend details live in the optional source.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Error authenticating the service")]
    Authentication {
        #[source]
        source: Option<BoxError>,
    },

    #[error("Error authorizing the service")]
    Authorization {
        #[source]
        source: Option<BoxError>,
    },
}

impl AuthError {
    pub fn authentication() -> Self {
        AuthError::Authentication { source: None }
    }

    pub fn authorization() -> Self {
        AuthError::Authorization { source: None }
    }

    pub fn authentication_with(source: impl Into<BoxError>) -> Self {
        AuthError::Authentication {
            source: Some(source.into()),
        }
    }

    pub fn authorization_with(source: impl Into<BoxError>) -> Self {
        AuthError::Authorization {
            source: Some(source.into()),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, AuthError::Authentication { .. })
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, AuthError::Authorization { .. })
    }
}
