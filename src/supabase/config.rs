use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

pub static BASE_URL: Lazy<String> = Lazy::new(|| {
    env::var("SUPABASE_URL")
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_default()
});

pub static SERVICE_KEY: Lazy<String> = Lazy::new(|| {
    env::var("SUPABASE_SERVICE_ROLE_KEY")
        .or_else(|_| env::var("SUPABASE_SERVICE_KEY"))
        .or_else(|_| env::var("SUPABASE_KEY"))
        .unwrap_or_default()
});

pub static ANON_KEY: Lazy<String> = Lazy::new(|| {
    env::var("SUPABASE_ANON_KEY").unwrap_or_else(|_| SERVICE_KEY.clone())
});

pub static IMAGE_BUCKET: Lazy<String> =
    Lazy::new(|| env::var("LISTING_IMAGE_BUCKET").unwrap_or_else(|_| "listing-images".to_string()));

pub static REST_ROOT: Lazy<String> = Lazy::new(|| format!("{}/rest/v1", *BASE_URL));

pub static AUTH_ROOT: Lazy<String> = Lazy::new(|| format!("{}/auth/v1", *BASE_URL));

pub static STORAGE_ROOT: Lazy<String> = Lazy::new(|| format!("{}/storage/v1", *BASE_URL));

/// Total request deadline for calls to the hosted backend.
pub static HTTP_TIMEOUT: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(env_u64("HTTP_TIMEOUT_SECS", 20)));

pub static HTTP_CONNECT_TIMEOUT: Lazy<Duration> =
    Lazy::new(|| Duration::from_secs(env_u64("HTTP_CONNECT_TIMEOUT_SECS", 5)));

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u64_falls_back_to_the_default() {
        assert_eq!(env_u64("GASBORA_UNSET_TIMEOUT_VAR", 17), 17);
    }
}
