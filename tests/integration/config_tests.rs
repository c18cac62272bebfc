use std::path::Path;

use figment::Jail;
use pixdupe::config::{ConfigError, Settings};

#[test]
fn test_settings_from_toml_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "custom.toml",
            r#"
strength = 8
workers = 2
extensions = ["png"]
archive_extensions = []
"#,
        )?;

        let settings = Settings::load(Some(Path::new("custom.toml"))).unwrap();
        assert_eq!(settings.strength, 8);
        assert_eq!(settings.workers, Some(2));
        assert_eq!(settings.extensions, vec!["png"]);
        assert!(settings.archive_extensions.is_empty());
        assert!(!settings.exact);

        let config = settings.engine_config();
        assert_eq!(config.strength, 8);
        assert_eq!(config.max_workers, Some(2));
        Ok(())
    });
}

#[test]
fn test_environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("custom.toml", "strength = 8\nexact = false\n")?;
        jail.set_env("PIXDUPE_STRENGTH", "2");
        jail.set_env("PIXDUPE_EXACT", "true");

        let settings = Settings::load(Some(Path::new("custom.toml"))).unwrap();
        assert_eq!(settings.strength, 2);
        assert!(settings.exact);
        Ok(())
    });
}

#[test]
fn test_environment_list_values() {
    Jail::expect_with(|jail| {
        jail.create_file("custom.toml", "")?;
        jail.set_env("PIXDUPE_EXTENSIONS", r#"["gif", "bmp"]"#);

        let settings = Settings::load(Some(Path::new("custom.toml"))).unwrap();
        assert_eq!(settings.extensions, vec!["gif", "bmp"]);
        Ok(())
    });
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    Jail::expect_with(|_| {
        let err = Settings::load(Some(Path::new("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        Ok(())
    });
}

#[test]
fn test_malformed_file_is_an_error() {
    Jail::expect_with(|jail| {
        jail.create_file("custom.toml", "strength = \"very\"\n")?;

        let err = Settings::load(Some(Path::new("custom.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        Ok(())
    });
}

#[test]
fn test_printed_settings_load_back() {
    Jail::expect_with(|jail| {
        let mut settings = Settings::default();
        settings.strength = 9;
        settings.extensions = vec!["webp".to_string()];
        jail.create_file("printed.toml", &settings.to_toml().unwrap())?;

        let loaded = Settings::load(Some(Path::new("printed.toml"))).unwrap();
        assert_eq!(loaded, settings);
        Ok(())
    });
}
