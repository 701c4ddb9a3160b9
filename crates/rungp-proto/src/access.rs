//! How the operator reaches a running workspace.

use serde::{Deserialize, Serialize};

/// Suffix of a multi-root workspace file. A workspace folder ending in it is
/// opened with the `workspace` query parameter instead of `folder`.
pub const WORKSPACE_FILE_SUFFIX: &str = ".code-workspace";

/// Ports and paths of a workspace, supplied by the runtime before observation
/// begins. Read-only to the observer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkspaceAccessInfo {
    /// Folder (or workspace file) inside the container, e.g. `/workspace/demo`.
    pub workspace_folder: String,
    /// Host port the IDE is published on.
    pub http_port: u16,
    /// Host port SSH is published on (0 = disabled).
    pub ssh_port: u16,
    /// Host port of the supervisor API (0 = no task observation).
    pub supervisor_port: u16,
}

impl WorkspaceAccessInfo {
    /// Name of the query parameter used to open the workspace folder.
    pub fn folder_param(&self) -> &'static str {
        if self.workspace_folder.ends_with(WORKSPACE_FILE_SUFFIX) {
            "workspace"
        } else {
            "folder"
        }
    }

    /// URL the IDE is reachable at from the host.
    pub fn workspace_url(&self) -> String {
        format!(
            "http://localhost:{}/?{}={}",
            self.http_port,
            self.folder_param(),
            self.workspace_folder
        )
    }
}

/// Access details announced to the renderer once the IDE is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceAccess {
    pub url: String,
    pub ssh_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(folder: &str) -> WorkspaceAccessInfo {
        WorkspaceAccessInfo {
            workspace_folder: folder.to_string(),
            http_port: 8080,
            ssh_port: 8082,
            supervisor_port: 0,
        }
    }

    #[test]
    fn test_folder_url() {
        assert_eq!(
            info("/workspace/demo").workspace_url(),
            "http://localhost:8080/?folder=/workspace/demo"
        );
    }

    #[test]
    fn test_workspace_file_url() {
        assert_eq!(
            info("/workspace/demo/all.code-workspace").workspace_url(),
            "http://localhost:8080/?workspace=/workspace/demo/all.code-workspace"
        );
    }

    #[test]
    fn test_suffix_must_be_at_end() {
        assert_eq!(info("/workspace/x.code-workspace.d").folder_param(), "folder");
    }
}
