use std::env;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub admin_api_url: String,
    pub admin_api_token: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            admin_api_url: env::var("ADMIN_API_URL")
                .unwrap_or_else(|_| "http://localhost:3457/admin/api/graphql.json".to_string()),
            admin_api_token: env::var("ADMIN_API_TOKEN")
                .unwrap_or_else(|_| "dev-token-change-in-production".to_string()),
        }
    }
}
