use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::repositories::UserRepository;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Identity of a signed-in user as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

impl CurrentUser {
    /// Same label other viewers see for this user
    pub fn label(&self) -> String {
        User {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            created_at: chrono::NaiveDateTime::MIN,
        }
        .label()
    }
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
        }
    }
}

/// Explicit caller context handed to every service operation
#[derive(Debug, Clone, Default)]
pub struct Caller {
    user: Option<CurrentUser>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn user(user: CurrentUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn current_user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.id)
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.is_none()
    }

    /// Fails with `Unauthenticated` for anonymous callers
    pub fn require_user(&self) -> AppResult<&CurrentUser> {
        self.user.as_ref().ok_or(AppError::Unauthenticated)
    }

    /// Resolve the caller for a request credential
    pub async fn resolve(provider: &dyn IdentityProvider, token: Option<&str>) -> AppResult<Self> {
        match token {
            Some(token) if !token.trim().is_empty() => Ok(Self {
                user: provider.current_user(token.trim()).await?,
            }),
            _ => Ok(Self::anonymous()),
        }
    }
}

/// Source of the signed-in user for a credential
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self, token: &str) -> AppResult<Option<CurrentUser>>;
}

/// Development provider: the token is the user's id
pub struct DevIdentityProvider {
    users: Arc<dyn UserRepository>,
}

impl DevIdentityProvider {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl IdentityProvider for DevIdentityProvider {
    async fn current_user(&self, token: &str) -> AppResult<Option<CurrentUser>> {
        let Ok(user_id) = Uuid::parse_str(token) else {
            return Ok(None);
        };

        let user = self.users.find_by_id(user_id).await?;
        Ok(user.map(CurrentUser::from))
    }
}

/// Provider that never recognises anyone; every connection stays anonymous
pub struct AnonymousOnly;

#[async_trait]
impl IdentityProvider for AnonymousOnly {
    async fn current_user(&self, _token: &str) -> AppResult<Option<CurrentUser>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_caller_is_unauthenticated() {
        let caller = Caller::anonymous();
        assert!(caller.is_anonymous());
        assert!(matches!(caller.require_user(), Err(AppError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_resolve_without_token_is_anonymous() {
        let caller = Caller::resolve(&AnonymousOnly, None).await.unwrap();
        assert!(caller.is_anonymous());

        let caller = Caller::resolve(&AnonymousOnly, Some("whatever")).await.unwrap();
        assert!(caller.is_anonymous());
    }
}
