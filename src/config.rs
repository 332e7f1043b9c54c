use once_cell::sync::Lazy;
use url::Url;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: sync-config -> reconciliation sweep cadence
pub static SYNC_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("SYNC_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600)
});

/// key: sync-config -> how late a reconciliation sweep may still start
pub static SYNC_MISFIRE_GRACE_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("SYNC_MISFIRE_GRACE_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(60)
});

/// key: executor-config -> approved-action sweep cadence
pub static EXECUTION_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("EXECUTION_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(60)
});

/// key: executor-config -> how late an execution sweep may still start
pub static EXECUTION_MISFIRE_GRACE_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("EXECUTION_MISFIRE_GRACE_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(30)
});

/// Hours before a requested sensitive action is considered expired. Recorded on the
/// action but not enforced by any transition.
pub static ACTION_EXPIRY_HOURS: Lazy<i64> = Lazy::new(|| {
    std::env::var("ACTION_EXPIRY_HOURS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(24)
});

/// Timeout applied to every outbound call to a provider key module.
pub static PROVIDER_MODULE_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PROVIDER_MODULE_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

/// Default waiting period for scheduled key deletions, in days.
pub static KEY_DELETION_WINDOW_DAYS: Lazy<u32> = Lazy::new(|| {
    std::env::var("KEY_DELETION_WINDOW_DAYS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(30)
});

/// Base URL of the AWS key module service.
pub static AWS_MODULE_URL: Lazy<Url> = Lazy::new(|| module_url("AWS_MODULE_URL", "http://aws_module:5000"));

/// Base URL of the Azure key module service.
pub static AZURE_MODULE_URL: Lazy<Url> =
    Lazy::new(|| module_url("AZURE_MODULE_URL", "http://azure_module:5000"));

/// Base URL of the GCP key module service.
pub static GCP_MODULE_URL: Lazy<Url> = Lazy::new(|| module_url("GCP_MODULE_URL", "http://gcp_module:5000"));

/// Optional endpoint alarms are forwarded to (mail gateway or chat webhook).
/// Unset disables outbound alarm delivery.
pub static ALERT_WEBHOOK_URL: Lazy<Option<Url>> = Lazy::new(|| {
    read_optional_env("ALERT_WEBHOOK_URL").map(|value| {
        Url::parse(&value).unwrap_or_else(|err| panic!("invalid ALERT_WEBHOOK_URL: {err}"))
    })
});

/// Recipient advertised in outbound alarm notifications.
pub static ALERT_RECIPIENT: Lazy<Option<String>> = Lazy::new(|| read_optional_env("ALERT_RECIPIENT"));

/// Password for the seeded `admin` account. When unset, no admin account is created.
pub static BOOTSTRAP_ADMIN_PASSWORD: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("BOOTSTRAP_ADMIN_PASSWORD"));

fn module_url(var: &str, default_value: &str) -> Url {
    let raw = read_optional_env(var).unwrap_or_else(|| default_value.to_string());
    Url::parse(&raw).unwrap_or_else(|err| panic!("invalid {var} '{raw}': {err}"))
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
