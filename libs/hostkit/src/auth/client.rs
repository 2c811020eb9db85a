use async_trait::async_trait;

use super::AuthError;
use crate::http::{AttributeValue, RequestContext};

/// Name reported by the built-in pass-through client.
pub const NOOP_CLIENT_NAME: &str = "nop";
/// Name reported by the built-in always-failing client.
pub const FAILURE_CLIENT_NAME: &str = "failure";

/// Authentication backend answering for a request-scoped context.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Backend name, for diagnostics.
    fn name(&self) -> &str;

    /// Establish the caller's identity.
    ///
    /// On success the returned context carries proof of identity. On failure
    /// the error is [`AuthError::Authentication`] and the input is untouched.
    async fn authenticate(&self, ctx: &RequestContext) -> Result<RequestContext, AuthError>;

    /// Check whether the caller embedded in `ctx` is permitted. Never mutates `ctx`.
    async fn authorize(&self, ctx: &RequestContext) -> Result<(), AuthError>;

    /// Return a copy of `ctx` carrying `key = value`.
    fn set_attribute(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &dyn AttributeValue,
    ) -> RequestContext {
        ctx.with_attribute(key, value)
    }
}

/// Default backend: lets everything through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClient;

#[async_trait]
impl AuthClient for NoopClient {
    fn name(&self) -> &str {
        NOOP_CLIENT_NAME
    }

    async fn authenticate(&self, ctx: &RequestContext) -> Result<RequestContext, AuthError> {
        Ok(ctx.clone())
    }

    async fn authorize(&self, _ctx: &RequestContext) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Backend that rejects every request. Useful in tests and demos.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailureClient;

#[async_trait]
impl AuthClient for FailureClient {
    fn name(&self) -> &str {
        FAILURE_CLIENT_NAME
    }

    async fn authenticate(&self, _ctx: &RequestContext) -> Result<RequestContext, AuthError> {
        Err(AuthError::authentication())
    }

    async fn authorize(&self, _ctx: &RequestContext) -> Result<(), AuthError> {
        Err(AuthError::authorization())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_client_passes_everything_through() {
        let ctx = RequestContext::new().with_attribute("tenant", &"acme");
        let client = NoopClient;

        assert_eq!(client.name(), NOOP_CLIENT_NAME);
        let authed = client.authenticate(&ctx).await.unwrap();
        assert_eq!(authed.attribute("tenant"), ctx.attribute("tenant"));
        assert!(client.authorize(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn failure_client_classifies_errors() {
        let ctx = RequestContext::new();
        let client = FailureClient;

        let err = client.authenticate(&ctx).await.unwrap_err();
        assert!(err.is_authentication());
        let err = client.authorize(&ctx).await.unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(err.to_string(), "Error authorizing the service");
    }

    #[test]
    fn set_attribute_is_pure_and_accepts_any_value() {
        struct Unserializable;
        impl serde::Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("cannot serialize"))
            }
        }

        let client = NoopClient;
        let base = RequestContext::new();
        let with_num = client.set_attribute(&base, "n", &42);
        let with_map = client.set_attribute(&with_num, "m", &serde_json::json!({"a": [1, 2]}));
        let with_bad = client.set_attribute(&with_map, "bad", &Unserializable);

        assert!(base.attribute("n").is_none());
        assert_eq!(with_num.attribute("n"), Some(&serde_json::json!(42)));
        assert!(with_num.attribute("m").is_none());
        assert_eq!(with_map.attribute("m"), Some(&serde_json::json!({"a": [1, 2]})));
        assert_eq!(with_bad.attribute("bad"), Some(&serde_json::Value::Null));
    }
}
