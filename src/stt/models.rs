//! Model artifact resolution.
//!
//! Models are ggml files named `ggml-<name>.bin` inside the configured
//! models directory. Nothing is downloaded here; a missing artifact just
//! drops that model from a segment's fallback chain.

use crate::defaults;
use std::path::{Path, PathBuf};

/// Full path for a model artifact.
pub fn model_path(models_dir: &Path, name: &str) -> PathBuf {
    models_dir.join(format!("ggml-{name}.bin"))
}

/// Whether the model artifact exists locally.
pub fn is_model_installed(models_dir: &Path, name: &str) -> bool {
    model_path(models_dir, name).is_file()
}

/// Parse a comma-separated model list, dropping empty entries.
pub fn parse_model_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The model order actually tried per segment: the requested list (or the
/// default) with the ultimate fallback appended unless already present.
pub fn effective_models(requested: &[String]) -> Vec<String> {
    let mut models: Vec<String> = if requested.is_empty() {
        defaults::DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
    } else {
        requested.to_vec()
    };
    if !models.iter().any(|m| m == defaults::FALLBACK_MODEL) {
        models.push(defaults::FALLBACK_MODEL.to_string());
    }
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_path_shape() {
        assert_eq!(
            model_path(Path::new("/models"), "base.en"),
            PathBuf::from("/models/ggml-base.en.bin")
        );
    }

    #[test]
    fn parse_model_list_trims_and_drops_empties() {
        assert_eq!(
            parse_model_list("base.en, small ,,large-v3"),
            vec!["base.en", "small", "large-v3"]
        );
        assert!(parse_model_list("").is_empty());
        assert!(parse_model_list(" , ").is_empty());
    }

    #[test]
    fn effective_models_appends_fallback() {
        let requested = vec!["base.en".to_string(), "small".to_string()];
        assert_eq!(
            effective_models(&requested),
            vec!["base.en", "small", "tiny.en"]
        );
    }

    #[test]
    fn effective_models_no_double_fallback() {
        let requested = vec!["tiny.en".to_string(), "base.en".to_string()];
        assert_eq!(effective_models(&requested), vec!["tiny.en", "base.en"]);
    }

    #[test]
    fn effective_models_bare_fallback_stays_alone() {
        let requested = vec!["tiny.en".to_string()];
        assert_eq!(effective_models(&requested), vec!["tiny.en"]);
    }

    #[test]
    fn effective_models_empty_uses_defaults_plus_fallback() {
        let models = effective_models(&[]);
        assert_eq!(models.first().map(String::as_str), Some("base.en"));
        assert_eq!(models.last().map(String::as_str), Some("tiny.en"));
    }

    #[test]
    fn installed_check_requires_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!is_model_installed(dir.path(), "base.en"));
        std::fs::write(model_path(dir.path(), "base.en"), b"stub").unwrap();
        assert!(is_model_installed(dir.path(), "base.en"));
    }
}
