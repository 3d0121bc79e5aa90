use crate::config::{Config, LogFormat, StoreBackend};
use figment::Jail;
use std::{path::Path, time::Duration};

#[test]
fn defaults_without_a_file() {
    Jail::expect_with(|_jail| {
        let config = Config::load(None)?;
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.engine.claim_window(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.finalizer.poll_interval(), Duration::from_secs(60));
        assert!(config.finalizer.enabled);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert!(config.identities.is_empty());
        Ok(())
    });
}

#[test]
fn env_overrides_the_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "claims.toml",
            r#"
            listen_addr = "127.0.0.1:8080"

            [engine]
            claim_window_secs = 3600

            [finalizer]
            poll_interval_secs = 30

            [log]
            format = "json"

            [[identities]]
            token = "alice-token"
            uid = "u1"
            email = "alice@example.com"
            display_name = "Alice"
            admin = true

            [[identities]]
            token = "bob-token"
            uid = "u2"
            email = "bob@example.com"
            "#,
        )?;
        jail.set_env("CLAIMS_FINALIZER__POLL_INTERVAL_SECS", "5");
        jail.set_env("CLAIMS_STORE__BACKEND", "postgres");
        jail.set_env("CLAIMS_STORE__POSTGRES_URL", "postgres://localhost/claims");

        let config = Config::load(Some(Path::new("claims.toml")))?;
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.engine.claim_window(), Duration::from_secs(3600));
        assert_eq!(config.engine.finalize_attempts, 3);
        assert_eq!(config.finalizer.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(
            config.store.postgres_url.as_deref(),
            Some("postgres://localhost/claims")
        );
        assert_eq!(config.log.format, LogFormat::Json);

        assert_eq!(config.identities.len(), 2);
        assert_eq!(config.identities[0].token, "alice-token");
        assert_eq!(config.identities[0].identity.name(), "Alice");
        assert_eq!(config.identities[1].identity.name(), "bob@example.com");
        assert!(config.identities[0].identity.admin);
        assert!(!config.identities[1].identity.admin);
        Ok(())
    });
}

#[test]
fn missing_file_is_an_error() {
    Jail::expect_with(|_jail| {
        assert!(Config::load(Some(Path::new("nope.toml"))).is_err());
        Ok(())
    });
}
