//! Identifier validation happens before anything touches a machine

use ship::errors::ShipError;
use ship::release::ident::{is_identifier, AppName, ReleaseVersion, SecretName, VolumeName};
use ship::release::ReleaseRequest;
use ship::storage::settings::Settings;

#[test]
fn test_identifier_class() {
    for valid in ["shop", "v3", "my_app-2", "A", "2024-06-01", "___"] {
        assert!(is_identifier(valid), "{valid}");
        assert!(AppName::new(valid).is_ok());
        assert!(ReleaseVersion::new(valid).is_ok());
        assert!(VolumeName::new(valid).is_ok());
        assert!(SecretName::new(valid).is_ok());
    }
    for invalid in ["", "app name", "v1.0/beta", "a.b", "../etc", "naïve", "x\n", "$(id)"] {
        assert!(!is_identifier(invalid), "{invalid:?}");
        assert!(matches!(AppName::new(invalid), Err(ShipError::ValidationError(_))));
    }
}

#[test]
fn test_request_rejects_any_bad_identifier() {
    assert!(ReleaseRequest::parse("shop", "v3", &["uploads", "db"]).is_ok());
    for (app, version, volume) in [
        ("app name", "v3", "data"),
        ("shop", "v1.0/beta", "data"),
        ("shop", "v3", "my volume"),
        ("", "v3", "data"),
    ] {
        let err = ReleaseRequest::parse(app, version, &[volume]).unwrap_err();
        assert!(matches!(err, ShipError::ValidationError(_)), "{app} {version} {volume}");
    }
}

#[test]
fn test_error_names_the_offending_value() {
    let err = VolumeName::new("my volume").unwrap_err();
    assert!(err.to_string().contains("\"my volume\""));
    let err = ReleaseVersion::new("").unwrap_err();
    assert!(err.to_string().contains("app version must not be empty"));
}

#[test]
fn test_parse_from_str() {
    let app: AppName = "shop".parse().unwrap();
    assert_eq!(app.as_str(), "shop");
    assert!("sh op".parse::<AppName>().is_err());
}

#[test]
fn test_settings_defaults_are_valid() {
    assert!(Settings::default().validate().is_ok());
}
