use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;
use toml::Value;

use crate::{Config, LlmConfig};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

    let mut raw_config: Value = toml::from_str(&content)?;
    expand_env_vars(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    validate_default_model(config)?;
    validate_rate_limits(config)?;

    Ok(())
}

/// Expands `${VAR}` references in every string value of the raw document,
/// reporting the TOML path of the offending value on failure.
fn expand_env_vars<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    use std::fmt::Write;

    match value {
        Value::String(s) => match shellexpand::env(s.as_str()) {
            Ok(expanded) => *s = expanded.into_owned(),
            Err(err) => {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => {
                            let _ = write!(p, "[{i}]");
                        }
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand environment variable at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_vars(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_env_vars(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

/// The default model must name a configured provider and one of its models.
fn validate_default_model(config: &Config) -> anyhow::Result<()> {
    let Some(model_id) = config.llm.default_model.as_deref() else {
        return Ok(());
    };

    let Some((provider_name, model_name)) = LlmConfig::split_model_id(model_id) else {
        bail!("Default model '{model_id}' must use the 'provider/model' form");
    };

    let Some(provider) = config.llm.providers.get(provider_name) else {
        bail!("Default model '{model_id}' references unknown provider '{provider_name}'");
    };

    if !provider.models.is_empty() && !provider.models.contains_key(model_name) {
        bail!("Default model '{model_id}' is not listed under provider '{provider_name}'");
    }

    Ok(())
}

fn validate_rate_limits(config: &Config) -> anyhow::Result<()> {
    let limits = &config.server.rate_limits;

    if !limits.enabled {
        return Ok(());
    }

    if limits.requests_per_minute == 0 {
        bail!("server.rate_limits.requests_per_minute must be greater than zero when rate limiting is enabled");
    }

    if limits.concurrent_streams == 0 {
        bail!("server.rate_limits.concurrent_streams must be greater than zero when rate limiting is enabled");
    }

    if !config.server.uses_oidc() {
        log::warn!("Rate limits are enabled without OIDC; anonymous callers share a single quota bucket");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;

    use crate::Config;

    #[test]
    fn default_model_must_reference_configured_provider() {
        let config_str = indoc! {r#"
            [llm]
            default_model = "missing/gpt-4"

            [llm.providers.local]
            type = "openai"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let error = super::validate(&config).unwrap_err().to_string();

        assert_snapshot!(error, @"Default model 'missing/gpt-4' references unknown provider 'missing'");
    }

    #[test]
    fn default_model_must_use_composite_form() {
        let config_str = indoc! {r#"
            [llm]
            default_model = "gpt-4"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let error = super::validate(&config).unwrap_err().to_string();

        assert_snapshot!(error, @"Default model 'gpt-4' must use the 'provider/model' form");
    }

    #[test]
    fn default_model_must_be_listed_when_models_are_declared() {
        let config_str = indoc! {r#"
            [llm]
            default_model = "local/gpt-4"

            [llm.providers.local]
            type = "openai"

            [llm.providers.local.models.llama3]
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let error = super::validate(&config).unwrap_err().to_string();

        assert_snapshot!(error, @"Default model 'local/gpt-4' is not listed under provider 'local'");
    }

    #[test]
    fn default_model_accepted_with_open_model_list() {
        let config_str = indoc! {r#"
            [llm]
            default_model = "local/anything"

            [llm.providers.local]
            type = "openai"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        assert!(super::validate(&config).is_ok());
    }

    #[test]
    fn zero_rpm_rejected_when_limits_enabled() {
        let config_str = indoc! {r#"
            [server.rate_limits]
            enabled = true
            requests_per_minute = 0
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let error = super::validate(&config).unwrap_err().to_string();

        assert_snapshot!(
            error,
            @"server.rate_limits.requests_per_minute must be greater than zero when rate limiting is enabled"
        );
    }

    #[test]
    fn env_expansion_reports_toml_path() {
        let mut raw: toml::Value = toml::from_str(indoc! {r#"
            [llm.providers.local]
            type = "openai"
            api_key = "${SWITCHBOARD_TEST_UNSET_VAR}"
        "#})
        .unwrap();

        let error = super::expand_env_vars(&mut Vec::new(), &mut raw)
            .unwrap_err()
            .to_string();

        assert!(error.contains("llm.providers.local.api_key"), "{error}");
    }
}
