pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum PasswordError {
    #[error("Password must be at least 8 characters")]
    TooShort,

    #[error("Password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    #[error("Password hashing task failed")]
    TaskFailed,
}

pub fn validate_strength(password: &str) -> Result<(), PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordError::TooShort);
    }
    Ok(())
}

/// bcrypt is CPU bound, so hashing runs on the blocking pool.
pub async fn hash(password: String, cost: u32) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|_| PasswordError::TaskFailed)?
        .map_err(PasswordError::from)
}

/// Malformed stored hashes count as a mismatch.
pub async fn verify(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength() {
        assert!(validate_strength("short").is_err());
        assert!(validate_strength("long-enough").is_ok());
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hashed = hash("correct horse".to_string(), 4).await.unwrap();

        assert!(verify("correct horse".to_string(), hashed.clone()).await);
        assert!(!verify("battery staple".to_string(), hashed).await);
    }

    #[tokio::test]
    async fn test_garbage_hash_does_not_verify() {
        assert!(!verify("anything".to_string(), "not-a-hash".to_string()).await);
    }
}
