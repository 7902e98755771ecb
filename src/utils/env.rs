use std::time::{SystemTime, UNIX_EPOCH};

/// Get environment variable with LISTWISE_ prefix, falling back to unprefixed version
///
/// Checks `LISTWISE_{key}` first, then `{key}`, so hosting platforms that
/// inject bare names (`PORT`, `STRIPE_SECRET_KEY`) keep working.
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("LISTWISE_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Current server time as unix seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_with_prefix() {
        unsafe {
            std::env::set_var("LISTWISE_ENV_TEST_VAR", "prefixed_value");
            std::env::set_var("ENV_TEST_VAR", "unprefixed_value");
        }
        assert_eq!(
            get_env_with_prefix("ENV_TEST_VAR"),
            Some("prefixed_value".to_string())
        );
        unsafe {
            std::env::remove_var("LISTWISE_ENV_TEST_VAR");
        }
        assert_eq!(
            get_env_with_prefix("ENV_TEST_VAR"),
            Some("unprefixed_value".to_string())
        );
        unsafe {
            std::env::remove_var("ENV_TEST_VAR");
        }

        assert_eq!(get_env_with_prefix("ENV_TEST_MISSING_VAR"), None);
    }

    #[test]
    fn test_empty_value_is_unset() {
        unsafe {
            std::env::set_var("LISTWISE_ENV_TEST_EMPTY", "");
        }
        assert_eq!(get_env_with_prefix("ENV_TEST_EMPTY"), None);
        unsafe {
            std::env::remove_var("LISTWISE_ENV_TEST_EMPTY");
        }
    }

    #[test]
    fn test_now_unix_is_recent() {
        // 2020-01-01
        assert!(now_unix() > 1_577_836_800);
    }
}
