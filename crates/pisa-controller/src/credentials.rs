//! Master password generation

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated master passwords
pub const PASSWORD_LENGTH: usize = 16;

/// Source of new master passwords
pub trait PasswordGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random ASCII letters and digits from the thread-local RNG
#[derive(Debug, Clone, Copy)]
pub struct RandomPasswordGenerator {
    length: usize,
}

impl RandomPasswordGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomPasswordGenerator {
    fn default() -> Self {
        Self::new(PASSWORD_LENGTH)
    }
}

impl PasswordGenerator for RandomPasswordGenerator {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_shape() {
        let password = RandomPasswordGenerator::default().generate();
        assert_eq!(password.len(), PASSWORD_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_passwords_differ() {
        let generator = RandomPasswordGenerator::default();
        assert_ne!(generator.generate(), generator.generate());
    }
}
