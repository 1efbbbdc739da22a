#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serial_test::serial;

    use crate::env::{
        AppConfig, DEFAULT_DATABASE_URL, DEFAULT_PUBLIC_BASE_URL, DEFAULT_TOKEN_TTL_MINUTES,
        DEFAULT_UPLOADS_DIR, load_env_files,
    };

    const CONFIG_VARS: [&str; 8] = [
        "DATABASE_URL",
        "JWT_SECRET",
        "TOKEN_TTL_MINUTES",
        "PASSWORD_HASH_COST",
        "UPLOADS_DIR",
        "PUBLIC_BASE_URL",
        "OTLP_ENDPOINT",
        "OTLP_API_KEY",
    ];

    fn with_config_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let mut all: Vec<(&str, Option<&str>)> = CONFIG_VARS.iter().map(|k| (*k, None)).collect();
        for (key, value) in vars {
            if let Some(slot) = all.iter_mut().find(|(k, _)| k == key) {
                slot.1 = Some(*value);
            }
        }
        temp_env::with_vars(all, f);
    }

    #[test]
    #[serial]
    fn test_defaults_apply_when_only_secret_is_set() {
        with_config_vars(&[("JWT_SECRET", "shh")], || {
            let config = AppConfig::from_env().expect("Config should load");

            assert_eq!(config.jwt_secret, "shh");
            assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
            assert_eq!(config.token_ttl_minutes, DEFAULT_TOKEN_TTL_MINUTES);
            assert_eq!(config.password_hash_cost, bcrypt::DEFAULT_COST);
            assert_eq!(config.uploads_dir, PathBuf::from(DEFAULT_UPLOADS_DIR));
            assert_eq!(config.public_base_url, DEFAULT_PUBLIC_BASE_URL);
            assert!(config.otlp_endpoint.is_none());
            assert_eq!(config.token_ttl(), chrono::Duration::minutes(120));
        });
    }

    #[test]
    #[serial]
    fn test_missing_secret_is_an_error() {
        with_config_vars(&[], || {
            let err = AppConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("JWT_SECRET"));
        });

        with_config_vars(&[("JWT_SECRET", "   ")], || {
            assert!(AppConfig::from_env().is_err());
        });
    }

    #[test]
    #[serial]
    fn test_overrides_are_parsed() {
        with_config_vars(
            &[
                ("JWT_SECRET", "shh"),
                ("DATABASE_URL", "sqlite://other.db"),
                ("TOKEN_TTL_MINUTES", "15"),
                ("PASSWORD_HASH_COST", "6"),
                ("UPLOADS_DIR", "/var/lib/registry/photos"),
                ("OTLP_ENDPOINT", "https://collector.example.com:4317"),
            ],
            || {
                let config = AppConfig::from_env().expect("Config should load");

                assert_eq!(config.database_url, "sqlite://other.db");
                assert_eq!(config.token_ttl_minutes, 15);
                assert_eq!(config.password_hash_cost, 6);
                assert_eq!(config.uploads_dir, PathBuf::from("/var/lib/registry/photos"));
                assert_eq!(
                    config.otlp_endpoint.as_deref(),
                    Some("https://collector.example.com:4317")
                );
            },
        );
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_are_rejected() {
        with_config_vars(&[("JWT_SECRET", "shh"), ("TOKEN_TTL_MINUTES", "soon")], || {
            let err = AppConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("TOKEN_TTL_MINUTES"));
        });

        with_config_vars(&[("JWT_SECRET", "shh"), ("TOKEN_TTL_MINUTES", "0")], || {
            assert!(AppConfig::from_env().is_err());
        });
    }

    #[test]
    #[serial]
    fn test_env_files_report_loaded_and_skipped() {
        let dir = std::env::temp_dir().join(format!("registry-env-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let present = dir.join("common.env");
        std::fs::write(&present, "REGISTRY_ENV_MARKER=from-file\n").unwrap();
        let missing = dir.join("absent.env");

        let present = present.to_string_lossy().to_string();
        let missing = missing.to_string_lossy().to_string();

        temp_env::with_var("REGISTRY_ENV_MARKER", None::<&str>, || {
            let report = load_env_files(&[present.as_str(), missing.as_str()])
                .expect("Missing files are skipped, not errors");

            assert_eq!(report.loaded, vec![present.clone()]);
            assert_eq!(report.skipped, vec![missing.clone()]);
            assert_eq!(
                std::env::var("REGISTRY_ENV_MARKER").as_deref(),
                Ok("from-file")
            );
        });
    }
}
