use reqwest::Client;

use crate::supabase::config::{HTTP_CONNECT_TIMEOUT, HTTP_TIMEOUT};

/// Shared client for every hosted-backend call; deadlines come from the
/// config layer alongside the rest of the backend tunables.
pub fn build_client() -> Client {
    Client::builder()
        .timeout(*HTTP_TIMEOUT)
        .connect_timeout(*HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}
