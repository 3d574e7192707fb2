//! Checkpoint archive to image conversion.
//!
//! The image wraps the archive as its only layer and carries an annotation
//! naming the checkpointed container, which is how the runtime recognises it
//! as a checkpoint image on create.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crestore_common::constants::CHECKPOINT_NAME_ANNOTATION;
use crestore_common::error::{CrestoreError, Result};
use crestore_common::types::CheckpointImage;
use crestore_runtime::exec::{CommandRunner, CommandSpec};

/// Turns a checkpoint archive into an exported image.
pub trait ArtifactConverter: Send + Sync {
    /// Builds an image from `archive`, exports it to `export`, and returns
    /// the store-local reference it was committed under.
    ///
    /// # Errors
    ///
    /// Returns an error if any build, commit, or export step fails. No image
    /// is left registered under the final reference on failure.
    fn convert(&self, archive: &Path, container_name: &str, export: &Path)
    -> Result<CheckpointImage>;
}

/// Converter driving `buildah`.
pub struct BuildahConverter {
    binary: String,
    reference: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl BuildahConverter {
    /// Creates a converter committing images under `reference`.
    #[must_use]
    pub fn new(
        binary: impl Into<String>,
        reference: impl Into<String>,
        timeout: Duration,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            binary: binary.into(),
            reference: reference.into(),
            timeout,
            runner,
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary, self.timeout)
    }

    fn from_scratch(&self) -> Result<String> {
        let spec = self.command().args(["from", "scratch"]);
        let output = self.runner.run_checked(&spec)?;
        output
            .stdout_lines()
            .last()
            .map(|l| l.trim().to_string())
            .ok_or_else(|| CrestoreError::Config {
                message: format!("`{spec}` returned no working container"),
            })
    }

    fn build_and_commit(&self, working: &str, archive: &Path, container_name: &str) -> Result<()> {
        let add = self
            .command()
            .arg("add")
            .arg(working)
            .arg(archive.to_string_lossy())
            .arg("/");
        let _ = self.runner.run_checked(&add)?;

        let annotate = self
            .command()
            .arg("config")
            .arg(format!("--annotation={CHECKPOINT_NAME_ANNOTATION}={container_name}"))
            .arg(working);
        let _ = self.runner.run_checked(&annotate)?;

        let commit = self
            .command()
            .arg("commit")
            .arg(working)
            .arg(&self.reference);
        let _ = self.runner.run_checked(&commit)?;
        tracing::info!(image = %self.reference, "checkpoint image committed");
        Ok(())
    }

    fn export(&self, export: &Path) -> Result<()> {
        let push = self
            .command()
            .arg("push")
            .arg(&self.reference)
            .arg(format!("oci-archive:{}:{}", export.display(), self.reference));
        let _ = self.runner.run_checked(&push)?;
        tracing::info!(image = %self.reference, export = %export.display(), "checkpoint image exported");
        Ok(())
    }

    fn remove_working_container(&self, working: &str) {
        let spec = self.command().arg("rm").arg(working);
        if let Err(e) = self.runner.run_checked(&spec) {
            tracing::warn!(working, error = %e, "failed to remove working container");
        }
    }

    fn remove_local_image(&self) {
        let spec = self.command().args(["rmi", "--force"]).arg(&self.reference);
        if let Err(e) = self.runner.run_checked(&spec) {
            tracing::warn!(image = %self.reference, error = %e, "failed to remove builder image");
        }
    }
}

impl ArtifactConverter for BuildahConverter {
    fn convert(
        &self,
        archive: &Path,
        container_name: &str,
        export: &Path,
    ) -> Result<CheckpointImage> {
        tracing::info!(archive = %archive.display(), container_name, "converting checkpoint archive");

        let working = self.from_scratch()?;
        let built = self.build_and_commit(&working, archive, container_name);
        self.remove_working_container(&working);
        built?;

        // The builder copy goes either way: exported on success, partial on failure.
        let exported = self.export(export);
        self.remove_local_image();
        exported?;

        Ok(CheckpointImage {
            reference: self.reference.clone(),
            export_path: export.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crestore_runtime::exec::scripted::ScriptedRunner;

    const REF: &str = "localhost/crestore-checkpoint:latest";

    fn converter(runner: &Arc<ScriptedRunner>) -> BuildahConverter {
        BuildahConverter::new(
            "buildah",
            REF,
            Duration::from_secs(60),
            Arc::clone(runner) as Arc<dyn CommandRunner>,
        )
    }

    #[test]
    fn runs_build_steps_in_order() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.stdout("from scratch", "working-container\n");

        let image = converter(&runner)
            .convert(Path::new("/run/cp.tar"), "counter", Path::new("/run/cp-image.tar"))
            .expect("convert");
        assert_eq!(image.reference, REF);
        assert_eq!(image.export_path, PathBuf::from("/run/cp-image.tar"));

        assert_eq!(
            runner.calls(),
            vec![
                "buildah from scratch".to_string(),
                "buildah add working-container /run/cp.tar /".into(),
                format!(
                    "buildah config --annotation={CHECKPOINT_NAME_ANNOTATION}=counter working-container"
                ),
                format!("buildah commit working-container {REF}"),
                "buildah rm working-container".into(),
                format!("buildah push {REF} oci-archive:/run/cp-image.tar:{REF}"),
                format!("buildah rmi --force {REF}"),
            ]
        );
    }

    #[test]
    fn failed_add_never_commits_and_cleans_working_container() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.stdout("from scratch", "wc\n");
        runner.fail(" add ", 125, "no such file");

        let err = converter(&runner)
            .convert(Path::new("/run/cp.tar"), "counter", Path::new("/run/out.tar"))
            .expect_err("add fails");
        assert!(matches!(err, CrestoreError::CommandFailed { code: 125, .. }));

        let calls = runner.calls();
        assert!(calls.iter().all(|c| !c.contains(" commit ")));
        assert_eq!(calls.last().map(String::as_str), Some("buildah rm wc"));
    }

    #[test]
    fn failed_export_removes_committed_image() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.stdout("from scratch", "wc\n");
        runner.fail(" push ", 1, "disk full");

        assert!(
            converter(&runner)
                .convert(Path::new("/run/cp.tar"), "counter", Path::new("/run/out.tar"))
                .is_err()
        );
        assert_eq!(
            runner.calls().last().map(String::as_str),
            Some(format!("buildah rmi --force {REF}").as_str())
        );
    }

    #[test]
    fn empty_from_output_is_an_error() {
        let runner = Arc::new(ScriptedRunner::new());
        let err = converter(&runner)
            .convert(Path::new("/run/cp.tar"), "counter", Path::new("/run/out.tar"))
            .expect_err("no working container");
        assert!(err.to_string().contains("no working container"));
    }
}
