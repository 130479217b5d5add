use regex::Regex;
use shared_types::AffectConfig;
use std::env;
use std::fs;
use std::path::Path;

use crate::errors::{CoreError, CoreResult};

/// Read `path`, substitute `{{VAR}}` placeholders from the environment and
/// parse it as an [`AffectConfig`].
pub fn load_config(path: impl AsRef<Path>) -> CoreResult<AffectConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> CoreResult<AffectConfig> {
    let processed = substitute_env(content)?;
    let config: AffectConfig = toml::from_str(&processed)?;
    validate(&config)?;
    Ok(config)
}

/// Replace `{{VAR_NAME}}` with the value of `VAR_NAME`. Unset variables are
/// left as written.
pub fn substitute_env(content: &str) -> CoreResult<String> {
    let re = Regex::new(r"\{\{([a-zA-Z0-9_]+)\}\}")
        .map_err(|e| CoreError::Config(format!("failed to create regex: {e}")))?;

    let processed = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| format!("{{{{{}}}}}", var_name))
    });
    Ok(processed.into_owned())
}

fn check_unit(name: &str, value: f64) -> CoreResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CoreError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn check_rate(name: &str, value: f64) -> CoreResult<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(CoreError::Config(format!(
            "{name} must be within (0, 1], got {value}"
        )));
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> CoreResult<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(CoreError::Config(format!(
            "{name} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}

fn check_positive<T: PartialOrd + Default + std::fmt::Display>(name: &str, value: T) -> CoreResult<()> {
    if value <= T::default() {
        return Err(CoreError::Config(format!("{name} must be positive, got {value}")));
    }
    Ok(())
}

/// Range and presence checks that the type system cannot express.
pub fn validate(config: &AffectConfig) -> CoreResult<()> {
    check_positive("health.rotation_window_secs", config.health.rotation_window_secs)?;
    check_positive("health.max_failures", config.health.max_failures)?;

    check_rate("ledger.learning_rate", config.ledger.learning_rate)?;
    check_non_negative("ledger.latency_penalty", config.ledger.latency_penalty)?;

    check_rate("mood.rate", config.mood.rate)?;
    check_unit("mood.default_tolerance", config.mood.default_tolerance)?;

    check_unit(
        "personality.resonance_threshold",
        config.personality.resonance_threshold,
    )?;
    if config.personality.ritual_keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(CoreError::Config(
            "personality.ritual_keywords must not contain empty entries".to_string(),
        ));
    }

    let routing = &config.routing;
    if routing.default_backend.trim().is_empty() {
        return Err(CoreError::Config(
            "routing.default_backend is required".to_string(),
        ));
    }
    check_non_negative("routing.task_priority_boost", routing.task_priority_boost)?;
    check_non_negative("routing.affinity_bonus", routing.affinity_bonus)?;
    check_non_negative("routing.layer_bonus", routing.layer_bonus)?;
    check_non_negative("routing.memory_bonus", routing.memory_bonus)?;
    check_positive("routing.invoke_timeout_ms", routing.invoke_timeout_ms)?;
    check_positive("routing.classify_timeout_ms", routing.classify_timeout_ms)?;
    check_positive("routing.memory_timeout_ms", routing.memory_timeout_ms)?;
    check_positive("routing.recommend_min_samples", routing.recommend_min_samples)?;
    if routing.recommend_window < routing.recommend_min_samples {
        return Err(CoreError::Config(format!(
            "routing.recommend_window ({}) must cover routing.recommend_min_samples ({})",
            routing.recommend_window, routing.recommend_min_samples
        )));
    }

    let sc = &config.self_correction;
    check_positive("self_correction.cadence_ms", sc.cadence_ms)?;
    check_positive("self_correction.sample_timeout_ms", sc.sample_timeout_ms)?;
    check_unit("self_correction.tolerance_step", sc.tolerance_step)?;
    check_non_negative(
        "self_correction.divergence_threshold",
        sc.divergence_threshold,
    )?;
    if sc.ritual_name.trim().is_empty() {
        return Err(CoreError::Config(
            "self_correction.ritual_name is required".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{EmotionLabel, PersonalityLayer};
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        validate(&AffectConfig::default()).unwrap();
    }

    #[test]
    fn substitutes_environment_placeholders() {
        env::set_var("AFFECT_TEST_DEFAULT_BACKEND", "mistral");
        let raw = r#"
            [routing]
            default_backend = "{{AFFECT_TEST_DEFAULT_BACKEND}}"
        "#;
        let config = parse_config(raw).unwrap();
        assert_eq!(config.routing.default_backend, "mistral");
    }

    #[test]
    fn unset_placeholder_is_left_verbatim() {
        let out = substitute_env("x = \"{{AFFECT_TEST_SURELY_UNSET_VAR}}\"").unwrap();
        assert_eq!(out, "x = \"{{AFFECT_TEST_SURELY_UNSET_VAR}}\"");
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = parse_config("[mood]\nrate = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("mood.rate"), "{err}");

        let err = parse_config("[health]\nmax_failures = 0\n").unwrap_err();
        assert!(err.to_string().contains("health.max_failures"), "{err}");

        let err = parse_config("[routing]\ndefault_backend = \" \"\n").unwrap_err();
        assert!(err.to_string().contains("default_backend"), "{err}");
    }

    #[test]
    fn recommend_window_must_cover_min_samples() {
        let err = parse_config("[routing]\nrecommend_min_samples = 5\nrecommend_window = 4\n")
            .unwrap_err();
        assert!(err.to_string().contains("recommend_window"), "{err}");
        assert!(parse_config("[routing]\nrecommend_min_samples = 0\n").is_err());
    }

    #[test]
    fn unknown_layer_fails_at_load_time() {
        let raw = r#"
            [personality.emotion_layers]
            joy = "gold_layer"
        "#;
        assert!(matches!(parse_config(raw), Err(CoreError::Toml(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [personality]
            initial_layer = "albedo_layer"

            [personality.emotion_layers]
            awe = "citrinitas"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.personality.initial_layer, Some(PersonalityLayer::Albedo));
        assert_eq!(
            config.personality.emotion_layers.get(&EmotionLabel::new("awe")),
            Some(&PersonalityLayer::Citrinitas)
        );
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_config("/definitely/not/here/affect.toml").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
