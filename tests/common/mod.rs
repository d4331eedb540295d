//! Shared test infrastructure: builds a throwaway install tree and runs the
//! featlist binary against it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A disposable installation root with features/, lib/, and an optional
/// extension registry.
pub struct InstallFixture {
    root: TempDir,
}

/// Outcome of one featlist invocation.
pub struct RunResult {
    pub code: i32,
    pub stderr: String,
    pub document: Option<String>,
}

impl Default for InstallFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallFixture {
    pub fn new() -> InstallFixture {
        let root = TempDir::new().expect("create fixture root");
        fs::create_dir_all(root.path().join("features")).expect("create features dir");
        fs::create_dir_all(root.path().join("lib")).expect("create lib dir");
        InstallFixture { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Writes a feature manifest. The file name is derived from the symbolic
    /// name in the JSON body.
    pub fn add_feature(&self, manifest: &str) {
        let value: serde_json::Value = serde_json::from_str(manifest).expect("manifest is JSON");
        let name = value["symbolicName"].as_str().expect("symbolicName present");
        fs::write(
            self.root.path().join("features").join(format!("{name}.json")),
            manifest,
        )
        .expect("write feature manifest");
    }

    /// Writes a component archive under lib/ with the given descriptor
    /// headers (one per line, without trailing newline handling).
    pub fn add_archive(&self, file: &str, headers: &[&str]) {
        let mut content = String::new();
        for header in headers {
            content.push_str(header);
            content.push('\n');
        }
        fs::write(self.root.path().join("lib").join(file), content).expect("write archive");
    }

    /// Writes a default-configuration fragment under lib/.
    pub fn add_fragment(&self, file: &str, content: &str) {
        fs::write(self.root.path().join("lib").join(file), content).expect("write fragment");
    }

    /// Registers a product extension and creates its install tree, returning
    /// the extension root.
    pub fn add_extension(&self, name: &str, location: &str) -> PathBuf {
        let registry = self.root.path().join("extensions.json");
        let mut entries: serde_json::Value = match fs::read_to_string(&registry) {
            Ok(content) => serde_json::from_str(&content).expect("registry is JSON"),
            Err(_) => serde_json::json!({}),
        };
        entries[name] = serde_json::json!({ "location": location });
        fs::write(&registry, entries.to_string()).expect("write registry");

        let extension_root = self.root.path().join(location);
        fs::create_dir_all(extension_root.join("features")).expect("create extension features");
        fs::create_dir_all(extension_root.join("lib")).expect("create extension lib");
        extension_root
    }

    /// Runs featlist with the given extra flags, returning the exit code and
    /// the generated document when one was produced.
    pub fn run(&self, extra_flags: &[&str]) -> RunResult {
        let output_path = self.root.path().join("featureList.xml");
        let mut command = Command::new(env!("CARGO_BIN_EXE_featlist"));
        command
            .arg("--install-dir")
            .arg(self.root.path())
            .args(extra_flags)
            .arg(&output_path);
        let output: Output = command.output().expect("run featlist");
        RunResult {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            document: fs::read_to_string(&output_path).ok(),
        }
    }
}

impl RunResult {
    pub fn document(&self) -> &str {
        self.document.as_deref().expect("document was generated")
    }
}
