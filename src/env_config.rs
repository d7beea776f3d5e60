//! Environment-variable parsing shared by the engine's tuning knobs.
//!
//! Every `SNOW_PICKER_*` read goes through these helpers so truthy/falsey
//! parsing lives in one place.

/// `true` when the variable is set to `1`, `true`, `yes` or `on`
/// (case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| {
            let normalized = raw.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(false)
}

/// The variable as a positive (> 0) `u32`. Unset, malformed and zero
/// values all yield `None`.
#[inline]
pub(crate) fn env_var_positive_u32(var_name: &str) -> Option<u32> {
    let raw = std::env::var(var_name).ok()?;
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            log::warn!("ignoring {var_name}={raw:?}: expected a positive integer");
            None
        }
    }
}

/// Declares a boolean feature flag read once from the environment and
/// cached in a `OnceLock<bool>`.
///
/// `enabled_unless(fn_name, "ENV_VAR")` is on by default and turned off by
/// a truthy value.
macro_rules! define_env_flag {
    (enabled_unless($fn_name:ident, $var:expr)) => {
        #[inline]
        fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
}

pub(crate) use define_env_flag;
