//! Per-operation request context.
//!
//! The tenant identifier and the acting user travel together in a
//! [`RequestContext`] value that is handed explicitly to every data-access
//! call. An operation binds its tenant once through [`run`] (or
//! [`RequestContext::run`] for a nested extent) and everything it awaits
//! receives the same value, so interleaved operations on the runtime can
//! never observe each other's tenant.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Invalid tenant identifier: {0:?}")]
    InvalidTenant(String),
}

/// Opaque identifier scoping all data belonging to one school.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Tenant ids become a prefix of physical collection names, so they are
    /// restricted to `[A-Za-z0-9_-]+`.
    pub fn new(raw: impl Into<String>) -> Result<Self, ContextError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ContextError::InvalidTenant(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The user on whose behalf the operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActingUser {
    pub id: Uuid,
}

impl ActingUser {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant: Option<TenantId>,
    user: Option<ActingUser>,
    request_id: Uuid,
}

impl RequestContext {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
            user: None,
            request_id: Uuid::new_v4(),
        }
    }

    /// Context for maintenance code that deliberately runs outside any tenant.
    pub fn untenanted() -> Self {
        Self {
            tenant: None,
            user: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn with_user(mut self, user: ActingUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Currently bound tenant, `None` when unbound.
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    pub fn user(&self) -> Option<ActingUser> {
        self.user
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Child context bound to another tenant. Acting user and request id are
    /// kept; the parent is left untouched.
    pub fn with_tenant(&self, tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
            user: self.user,
            request_id: self.request_id,
        }
    }

    /// Nested run: `f` sees `tenant`, the caller keeps seeing its own.
    pub async fn run<F, Fut, T>(&self, tenant: TenantId, f: F) -> T
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let child = self.with_tenant(tenant);
        let span = child.span();
        f(child).instrument(span).await
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            tenant = self.tenant.as_ref().map(TenantId::as_str).unwrap_or("-"),
            request_id = %self.request_id,
        )
    }
}

/// Runs `f` with `tenant` bound for the whole extent of the returned future.
pub async fn run<F, Fut, T>(tenant: TenantId, user: Option<ActingUser>, f: F) -> T
where
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = T>,
{
    let mut ctx = RequestContext::new(tenant);
    ctx.user = user;
    let span = ctx.span();
    f(ctx).instrument(span).await
}

/// Runs `f` with no tenant bound; data access resolves to un-prefixed targets.
pub async fn run_untenanted<F, Fut, T>(f: F) -> T
where
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = T>,
{
    let ctx = RequestContext::untenanted();
    let span = ctx.span();
    f(ctx).instrument(span).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(s: &str) -> TenantId {
        TenantId::new(s).unwrap()
    }

    #[test]
    fn rejects_tenant_ids_that_cannot_prefix_a_collection() {
        assert!(TenantId::new("school-a").is_ok());
        assert!(TenantId::new("school_42").is_ok());
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("a b").is_err());
        assert!(TenantId::new("a.b").is_err());
    }

    #[tokio::test]
    async fn unbound_context_has_no_tenant() {
        let seen = run_untenanted(|ctx| async move { ctx.tenant().cloned() }).await;
        assert_eq!(seen, None);
    }

    #[tokio::test]
    async fn nested_run_shadows_only_within_its_extent() {
        let user = ActingUser::new(Uuid::new_v4());
        run(tenant("outer"), Some(user), |ctx| async move {
            let inner = ctx
                .run(tenant("inner"), |child| async move {
                    tokio::task::yield_now().await;
                    (child.tenant().cloned(), child.user())
                })
                .await;
            assert_eq!(inner.0, Some(tenant("inner")));
            assert_eq!(inner.1, Some(user));
            assert_eq!(ctx.tenant(), Some(&tenant("outer")));
        })
        .await;
    }

    #[tokio::test]
    async fn interleaved_operations_keep_their_own_tenant() {
        let mut handles = Vec::new();
        for i in 0..32 {
            let id = tenant(&format!("t{}", i));
            handles.push(tokio::spawn(run(id.clone(), None, move |ctx| async move {
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                    assert_eq!(ctx.tenant(), Some(&id));
                }
                ctx.tenant().cloned()
            })));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Some(tenant(&format!("t{}", i))));
        }
    }
}
