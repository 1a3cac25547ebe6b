use async_trait::async_trait;
use uuid::Uuid;

/// Identity seam. The server only needs "which account does this token
/// belong to"; issuing and refreshing tokens is the identity provider's
/// problem.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<Uuid>;
}

/// Shared-secret tokens of the form `<account_uuid>:<secret>`.
pub struct SharedSecretAuth {
    secret: String,
}

impl SharedSecretAuth {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl Authenticator for SharedSecretAuth {
    async fn authenticate(&self, token: &str) -> Option<Uuid> {
        let (account, secret) = token.split_once(':')?;
        if secret != self.secret {
            return None;
        }
        Uuid::parse_str(account).ok()
    }
}
