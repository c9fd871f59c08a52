//! Masking of secrets for logs and error messages.

const VISIBLE_PREFIX: usize = 4;

/// Masks a secret, keeping a short prefix for correlation.
///
/// ```
/// use turnstile_core::redact;
///
/// assert_eq!(redact("abcdef123456"), "abcd****");
/// assert_eq!(redact("abc"), "****");
/// ```
pub fn redact(secret: &str) -> String {
    if secret.chars().count() <= VISIBLE_PREFIX * 2 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(VISIBLE_PREFIX).collect();
    format!("{prefix}****")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_secret_fully_masked() {
        assert_eq!(redact(""), "****");
        assert_eq!(redact("12345678"), "****");
    }

    #[test]
    fn test_long_secret_keeps_prefix() {
        assert_eq!(redact("KEY1-0000-1111"), "KEY1****");
    }
}
