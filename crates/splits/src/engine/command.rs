//! Engine adapter running an external program.
//!
//! The program is invoked as
//!
//! ```text
//! {program} {args...} --bundle <file> --output <dir> --device-spec <file>
//!     --modules <a,b> --languages <x,y> --include-missing <true|false>
//! ```
//!
//! and must leave one `*.apk` file per split in the output directory.

use crate::engine::{BundleSource, SplitEngine};
use crate::error::{SplitError, SplitResult};
use async_trait::async_trait;
use bytes::Bytes;
use splitstore_core::{SplitApk, SplitRequest};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Bytes of stderr kept in error messages.
const STDERR_TAIL: usize = 2048;

#[derive(Clone, Debug)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

fn io_failure(what: &str, err: std::io::Error) -> SplitError {
    SplitError::Generation(format!("{what}: {err}"))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

fn join(values: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    values
        .into_iter()
        .map(|v| v.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl CommandEngine {
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    async fn collect_output(dir: &Path) -> SplitResult<Vec<SplitApk>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| io_failure("failed to read engine output", e))?;
        let mut apks = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_failure("failed to read engine output", e))?
        {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file || path.extension().is_none_or(|ext| ext != "apk") {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| io_failure("failed to read split", e))?;
            let apk = SplitApk::new(name, Bytes::from(data))
                .map_err(|e| SplitError::Generation(e.to_string()))?;
            apks.push(apk);
        }

        apks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apks)
    }
}

#[async_trait]
impl SplitEngine for CommandEngine {
    async fn generate(
        &self,
        bundle: BundleSource,
        request: &SplitRequest,
    ) -> SplitResult<Vec<SplitApk>> {
        let workdir =
            tempfile::TempDir::new().map_err(|e| io_failure("failed to create workdir", e))?;
        let bundle_path = workdir.path().join("bundle.aab");
        let spec_path = workdir.path().join("device-spec.json");
        let output_dir = workdir.path().join("out");

        let spec = serde_json::to_vec(&request.device_spec)
            .map_err(|e| SplitError::Generation(format!("failed to encode device spec: {e}")))?;
        let staged = bundle.write_to(&bundle_path).await?;
        debug!(bytes = staged, "Staged bundle for split engine");
        tokio::fs::write(&spec_path, spec)
            .await
            .map_err(|e| io_failure("failed to stage device spec", e))?;
        tokio::fs::create_dir(&output_dir)
            .await
            .map_err(|e| io_failure("failed to create output dir", e))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--bundle")
            .arg(&bundle_path)
            .arg("--output")
            .arg(&output_dir)
            .arg("--device-spec")
            .arg(&spec_path)
            .arg("--modules")
            .arg(join(&request.modules))
            .arg("--languages")
            .arg(join(&request.languages))
            .arg("--include-missing")
            .arg(request.include_missing.to_string())
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            program = %self.program.display(),
            timeout_secs = self.timeout.as_secs(),
            "Invoking split engine"
        );
        let child = cmd
            .spawn()
            .map_err(|e| io_failure("failed to start split engine", e))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| io_failure("split engine wait failed", e))?,
            Err(_) => {
                warn!(program = %self.program.display(), "Split engine timed out");
                return Err(SplitError::Generation(format!(
                    "split engine timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            return Err(SplitError::Generation(format!(
                "split engine exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let apks = Self::collect_output(&output_dir).await?;
        debug!(splits = apks.len(), "Split engine finished");
        Ok(apks)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use splitstore_core::DeviceSpec;

    fn sh(script: &str, timeout: Duration) -> CommandEngine {
        CommandEngine::new(
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), script.to_string(), "engine".to_string()],
            timeout,
        )
    }

    fn request() -> SplitRequest {
        SplitRequest::new(
            DeviceSpec {
                supported_abis: vec!["arm64-v8a".to_string()],
                supported_locales: vec!["en".to_string()],
                device_features: vec![],
                gl_extensions: vec![],
                screen_density: 320,
                sdk_version: 30,
            },
            ["feature".to_string()],
            ["de".to_string(), "it".to_string()],
            true,
        )
    }

    const WRITE_SPLITS: &str = r#"
        while [ $# -gt 0 ]; do
            case "$1" in
                --output) out="$2"; shift 2 ;;
                --modules) modules="$2"; shift 2 ;;
                --languages) languages="$2"; shift 2 ;;
                --include-missing) missing="$2"; shift 2 ;;
                *) shift ;;
            esac
        done
        printf '%s' "$modules|$languages|$missing" > "$out/base-master.apk"
        printf 'de' > "$out/base-de.apk"
        printf 'ignored' > "$out/notes.txt"
    "#;

    #[tokio::test]
    async fn test_collects_apks_and_passes_arguments() {
        let engine = sh(WRITE_SPLITS, Duration::from_secs(10));
        let apks = engine
            .generate(Bytes::from_static(b"bundle").into(), &request())
            .await
            .unwrap();

        let names: Vec<_> = apks.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["base-de.apk", "base-master.apk"]);
        assert_eq!(apks[1].data, Bytes::from_static(b"feature|de,it|true"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_generation_error() {
        let engine = sh("echo boom >&2; exit 3", Duration::from_secs(10));
        let err = engine
            .generate(Bytes::from_static(b"bundle").into(), &request())
            .await
            .unwrap_err();
        match err {
            SplitError::Generation(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let engine = sh("sleep 5", Duration::from_millis(200));
        let err = engine
            .generate(Bytes::from_static(b"bundle").into(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, SplitError::Generation(msg) if msg.contains("timed out")));
    }
}
