//! On-disk layout (§6.4): where an agent's working directory and a
//! source-control project's shared clone live, relative to the system
//! directory root. Shared between the agent runner (which scopes
//! function-class execution to an agent's working directory) and the
//! review engine's source-control adapter (which shares one clone of a
//! project across MRs rather than re-cloning per review).

use std::path::{Path, PathBuf};

/// `${TYPEDAI_SYS_DIR || cwd}/.typedai`. Falls back to the current
/// working directory, matching "no configuration needed to boot locally."
pub fn system_dir() -> PathBuf {
    let root = std::env::var("TYPEDAI_SYS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    root.join(".typedai")
}

/// `<systemDir>/agents/<agentId>/`.
pub fn agent_working_dir(system_dir: &Path, agent_id: &str) -> PathBuf {
    system_dir.join("agents").join(agent_id)
}

/// `<systemDir>/<scm>/<projectPathWithNamespace>`, the shared clone
/// location for a source-control project. `scm` is the lowercase adapter
/// name (e.g. `"gitlab"`).
pub fn scm_project_dir(system_dir: &Path, scm: &str, project_path_with_namespace: &str) -> PathBuf {
    system_dir.join(scm).join(project_path_with_namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_working_dir_nests_under_agents() {
        let sys = PathBuf::from("/tmp/sys/.typedai");
        assert_eq!(agent_working_dir(&sys, "a1"), PathBuf::from("/tmp/sys/.typedai/agents/a1"));
    }

    #[test]
    fn scm_project_dir_nests_under_the_scm_name() {
        let sys = PathBuf::from("/tmp/sys/.typedai");
        assert_eq!(
            scm_project_dir(&sys, "gitlab", "group/project"),
            PathBuf::from("/tmp/sys/.typedai/gitlab/group/project")
        );
    }

    #[test]
    fn system_dir_honors_typedai_sys_dir_when_set() {
        std::env::set_var("TYPEDAI_SYS_DIR", "/tmp/custom-sys-dir");
        assert_eq!(system_dir(), PathBuf::from("/tmp/custom-sys-dir/.typedai"));
        std::env::remove_var("TYPEDAI_SYS_DIR");
    }
}
