//! Reasoning chains as markdown documents with YAML frontmatter.
//!
//! One file per (correlation id, agent): `reasoning/<correlation_id>/<agent>.md`.
//! The frontmatter carries `{id, correlation_id, created_at, status}`; the
//! body is the agent's externalized reasoning, verbatim.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fs_util;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningFrontmatter {
    pub id: String,
    pub correlation_id: String,
    /// RFC3339.
    pub created_at: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningDoc {
    pub frontmatter: ReasoningFrontmatter,
    pub body: String,
}

impl ReasoningDoc {
    pub fn render(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.frontmatter)?;
        Ok(format!("---\n{yaml}---\n\n{}", self.body))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let rest = content
            .strip_prefix("---\n")
            .context("reasoning doc missing frontmatter opener")?;
        let (yaml, body) = rest
            .split_once("\n---\n")
            .context("reasoning doc missing frontmatter closer")?;
        Ok(Self {
            frontmatter: serde_yaml::from_str(yaml)?,
            body: body.trim_start_matches('\n').to_string(),
        })
    }
}

pub struct ReasoningStore {
    dir: PathBuf,
}

impl ReasoningStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn doc_path(&self, correlation_id: &str, agent: &str) -> Result<PathBuf> {
        if correlation_id.contains(['/', '\\']) || agent.contains(['/', '\\']) {
            bail!("reasoning path segments must not contain separators");
        }
        Ok(self.dir.join(correlation_id).join(format!("{agent}.md")))
    }

    pub fn put(&self, agent: &str, doc: &ReasoningDoc) -> Result<()> {
        let path = self.doc_path(&doc.frontmatter.correlation_id, agent)?;
        fs_util::atomic_write(&path, doc.render()?.as_bytes())
    }

    pub fn get(&self, correlation_id: &str, agent: &str) -> Result<Option<ReasoningDoc>> {
        let path = self.doc_path(correlation_id, agent)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context(format!("reading {}", path.display())),
        };
        Ok(Some(ReasoningDoc::parse(&content)?))
    }

    /// Agents with persisted reasoning for a correlation id.
    pub fn list_agents(&self, correlation_id: &str) -> Result<Vec<String>> {
        let dir = self.dir.join(correlation_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut agents = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(agent) = name.strip_suffix(".md") {
                agents.push(agent.to_string());
            }
        }
        agents.sort();
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(correlation_id: &str, body: &str) -> ReasoningDoc {
        ReasoningDoc {
            frontmatter: ReasoningFrontmatter {
                id: "r-1".into(),
                correlation_id: correlation_id.into(),
                created_at: "2026-08-01T00:00:00Z".into(),
                status: "final".into(),
            },
            body: body.into(),
        }
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let original = doc("corr-1", "# Strategy\n\nRefactor the flaky suite first.");
        let rendered = original.render().unwrap();
        assert!(rendered.starts_with("---\n"));
        let parsed = ReasoningDoc::parse(&rendered).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_store_roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReasoningStore::open(dir.path()).unwrap();
        store.put("architect", &doc("corr-1", "plan A")).unwrap();
        store.put("witness", &doc("corr-1", "saw it thrice")).unwrap();

        assert_eq!(store.list_agents("corr-1").unwrap(), vec!["architect", "witness"]);
        let loaded = store.get("corr-1", "architect").unwrap().unwrap();
        assert_eq!(loaded.body, "plan A");
        assert!(store.get("corr-2", "architect").unwrap().is_none());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReasoningStore::open(dir.path()).unwrap();
        assert!(store.get("../escape", "agent").is_err());
        assert!(store.get("corr", "a/b").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_frontmatter() {
        assert!(ReasoningDoc::parse("no frontmatter here").is_err());
    }
}
