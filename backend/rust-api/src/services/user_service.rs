use std::sync::Arc;
use validator::Validate;

use super::session_store::SessionStore;
use crate::error::QuizError;
use crate::models::user::{FindOrCreateUserRequest, User};

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn SessionStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn find_or_create(&self, req: FindOrCreateUserRequest) -> Result<User, QuizError> {
        req.validate()
            .map_err(|e| QuizError::validation(e.to_string()))?;
        let user = self.store.find_or_create_user(&req.name).await?;
        tracing::debug!("Resolved user {} -> {}", user.name, user.id);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_store::InMemorySessionStore;

    #[tokio::test]
    async fn same_name_resolves_to_same_user() {
        let service = UserService::new(Arc::new(InMemorySessionStore::new()));
        let first = service
            .find_or_create(FindOrCreateUserRequest { name: "Wei Jie".into() })
            .await
            .unwrap();
        let second = service
            .find_or_create(FindOrCreateUserRequest { name: "Wei Jie".into() })
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn one_letter_name_is_rejected() {
        let service = UserService::new(Arc::new(InMemorySessionStore::new()));
        let err = service
            .find_or_create(FindOrCreateUserRequest { name: "W".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::Validation(_)));
    }
}
