//! `validate` command handler.

use crate::cli::args::ValidateArgs;
use crate::config::ConfigLoader;
use crate::error::{ConfigError, LootRunError, Severity, ValidationIssue};

/// Validate configuration files without starting a server.
///
/// Stops at the first failing file.
///
/// # Errors
///
/// Returns a config error if a file is missing, fails to parse, fails
/// validation, or (with `--strict`) produced warnings.
pub fn run(args: &ValidateArgs) -> Result<(), LootRunError> {
    let loader = ConfigLoader::default();

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let load_result = loader.load(path)?;

        for warning in &load_result.warnings {
            tracing::warn!(
                location = warning.location.as_deref().unwrap_or("<unknown>"),
                "{}",
                warning.message
            );
        }

        if args.strict && !load_result.warnings.is_empty() {
            let errors = load_result
                .warnings
                .iter()
                .map(|w| ValidationIssue {
                    path: w.location.clone().unwrap_or_default(),
                    message: w.message.clone(),
                    severity: Severity::Warning,
                })
                .collect();
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors,
            }
            .into());
        }

        tracing::info!(file = %path.display(), "configuration valid");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn strict_turns_warnings_into_errors() {
        let f = file("contest:\n  auto_start: false\n");
        let lenient = ValidateArgs {
            files: vec![f.path().to_path_buf()],
            strict: false,
        };
        assert!(run(&lenient).is_ok());

        let strict = ValidateArgs {
            files: vec![f.path().to_path_buf()],
            strict: true,
        };
        let err = run(&strict).unwrap_err();
        assert!(matches!(
            err,
            LootRunError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn missing_file_fails() {
        let args = ValidateArgs {
            files: vec!["/definitely/not/here.yaml".into()],
            strict: false,
        };
        assert!(matches!(
            run(&args).unwrap_err(),
            LootRunError::Config(ConfigError::MissingFile { .. })
        ));
    }
}
