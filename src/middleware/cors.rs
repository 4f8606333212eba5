use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tower_http::cors::{Any, CorsLayer};

use crate::{config::AppConfig, middleware::request_id::REQUEST_ID_HEADER};

pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let headers = vec![ACCEPT, AUTHORIZATION, CONTENT_TYPE, REQUEST_ID_HEADER.clone()];

    let mut layer = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(headers)
        .expose_headers([REQUEST_ID_HEADER.clone()]);

    if config
        .cors_origins
        .iter()
        .any(|origin| origin.trim() == "*")
    {
        layer = layer.allow_origin(Any).allow_credentials(false);
    } else {
        let origins = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect::<Vec<_>>();
        layer = layer.allow_origin(origins).allow_credentials(true);
    }

    layer
}

#[cfg(test)]
mod tests {
    use super::build_cors_layer;
    use crate::config::AppConfig;

    #[test]
    fn builds_for_wildcard_and_explicit_origins() {
        let mut config = AppConfig::from_env();
        config.cors_origins = vec!["*".to_string()];
        let _ = build_cors_layer(&config);

        config.cors_origins = vec![
            "http://localhost:3000".to_string(),
            "not a header value\n".to_string(),
        ];
        let _ = build_cors_layer(&config);
    }
}
