//! File capabilities confined to a workspace root
//!
//! `write_file`, `read_file` and `list_dir` resolve every path against the
//! workspace. Paths that would escape it (absolute paths elsewhere, `..`
//! segments climbing above the root) are rejected before touching disk.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::definition::{Capability, CapabilityError, required_str};

/// Default cap on bytes returned by `read_file`
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 100_000;

/// Workspace shared by the file capabilities
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    max_output_bytes: usize,
}

impl Workspace {
    /// The root is made absolute against the current directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root: normalize(&root),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Set maximum output size in bytes
    pub fn with_max_output(mut self, max_bytes: usize) -> Self {
        self.max_output_bytes = max_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` inside the workspace, rejecting escapes
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, CapabilityError> {
        let candidate = Path::new(relative);
        confine(&self.root, candidate).ok_or_else(|| CapabilityError::SandboxViolation {
            path: candidate.to_path_buf(),
            root: self.root.clone(),
        })
    }
}

/// Lexically collapse `.` and `..`; `..` never climbs past the filesystem root
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Walk `candidate` from `root` (or from `/` when absolute). None if any
/// `..` climbs above the root or the result lies outside it.
fn confine(root: &Path, candidate: &Path) -> Option<PathBuf> {
    if !root.is_absolute() {
        return None;
    }
    let mut out = if candidate.is_absolute() {
        PathBuf::new()
    } else {
        root.to_path_buf()
    };
    for component in candidate.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out == root || !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.starts_with(root).then_some(out)
}

/// Write (create or overwrite) a file
pub struct WriteFile {
    workspace: Arc<Workspace>,
}

impl WriteFile {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text content to a file in the workspace, creating parent directories."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace"},
                "content": {"type": "string", "description": "Text to write"}
            },
            "required": ["path", "content"]
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, CapabilityError> {
        let path = self.workspace.resolve(required_str(args, "path")?)?;
        // Numbers and booleans are written in their JSON form
        let content = match args.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => return Err(CapabilityError::invalid("'content' is required")),
            Some(other) => other.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CapabilityError::io("create_dir_all", e))?;
        }
        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(|e| CapabilityError::io("write", e))?;

        Ok(json!({
            "path": path.display().to_string(),
            "bytes": content.len(),
        }))
    }
}

/// Read a text file
pub struct ReadFile {
    workspace: Arc<Workspace>,
}

impl ReadFile {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace"}
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, CapabilityError> {
        let path = self.workspace.resolve(required_str(args, "path")?)?;
        let mut content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CapabilityError::io("read", e))?;

        let max = self.workspace.max_output_bytes;
        if content.len() > max {
            let mut cut = max;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n... [output truncated]");
        }
        Ok(Value::String(content))
    }
}

/// List a directory
pub struct ListDir {
    workspace: Arc<Workspace>,
}

impl ListDir {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for ListDir {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List entries of a workspace directory. Directories carry a trailing '/'."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the workspace (default '.')"}
            }
        })
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, CapabilityError> {
        let relative = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = self.workspace.resolve(relative)?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| CapabilityError::io("read_dir", e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| CapabilityError::io("read_dir", e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(json!(entries))
    }
}
