// Sample records
// Append-only line-delimited JSON, one record per generated completion,
// written only by the rank that owns generation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use super::engine::GenerationEngine;

/// One generated completion, tagged with the step it was produced at so it
/// can be correlated with training curves later
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub prompt: String,
    pub completion: String,
    pub tr_step: u64,
}

/// Generate a completion for every prompt and append the records
pub fn write_samples(
    engine: &mut dyn GenerationEngine,
    prompts: &[String],
    output_path: &Path,
    tr_step: u64,
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create sample output directory {}", parent.display())
            })?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_path)
        .with_context(|| format!("Failed to open sample file {}", output_path.display()))?;

    for prompt in prompts {
        let completion = engine
            .generate(prompt)
            .with_context(|| format!("Generation failed for prompt {:?}", prompt))?;
        let record = SampleRecord {
            prompt: prompt.clone(),
            completion,
            tr_step,
        };
        let line = serde_json::to_string(&record).context("Failed to serialize sample record")?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to {}", output_path.display()))?;
    }

    tracing::debug!(
        tr_step,
        prompts = prompts.len(),
        path = %output_path.display(),
        "Wrote sample records"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::TrainerState;
    use tempfile::TempDir;

    struct EchoEngine;

    impl GenerationEngine for EchoEngine {
        fn refresh_weights(&mut self, _state: &TrainerState) -> Result<()> {
            Ok(())
        }

        fn generate(&mut self, prompt: &str) -> Result<String> {
            Ok(format!("{} world", prompt))
        }
    }

    #[test]
    fn test_records_append_across_calls() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("samples.jsonl");
        let prompts = vec!["hello".to_string()];
        let mut engine = EchoEngine;

        write_samples(&mut engine, &prompts, &path, 1).unwrap();
        write_samples(&mut engine, &prompts, &path, 6).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<SampleRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tr_step, 1);
        assert_eq!(records[1].tr_step, 6);
        assert_eq!(records[0].completion, "hello world");
    }

    #[test]
    fn test_missing_parent_directory_is_created() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/samples.jsonl");
        let mut engine = EchoEngine;

        write_samples(&mut engine, &["hi".to_string()], &path, 3).unwrap();
        assert!(path.exists());
    }
}
