//! Config-derived locations and stores shared by the subcommands.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context as _, bail},
    modsmith_config::{LedgerBackend, ModsmithConfig},
    modsmith_engine::{BaselineStore, Overrides},
    modsmith_ledger::{
        LedgerStore, store_file::FileStore, store_memory::InMemoryStore,
        store_sqlite::SqliteStore,
    },
    tracing::{debug, warn},
};

pub struct Workspace {
    pub config: ModsmithConfig,
    pub config_path: Option<PathBuf>,
}

impl Workspace {
    /// An explicit `path` must load; a discovered file that fails to parse
    /// falls back to defaults with a warning.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Ok(Self {
                config: modsmith_config::load_config(path)?,
                config_path: Some(path.to_path_buf()),
            }),
            None => Ok(Self {
                config: modsmith_config::discover_and_load(),
                config_path: modsmith_config::find_config_file(),
            }),
        }
    }

    /// Point the run at another target tree. The state dir follows unless
    /// the config pins it.
    pub fn set_target_root(&mut self, root: PathBuf) {
        self.config.target.root = root;
    }

    pub fn target_root(&self) -> &Path {
        &self.config.target.root
    }

    pub fn catalog_path(&self, flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
        match flag.or_else(|| self.config.catalog.path.clone()) {
            Some(path) => Ok(path),
            None => bail!("no catalog given: pass --catalog or set catalog.path in the config"),
        }
    }

    pub async fn ledger_store(&self) -> anyhow::Result<Arc<dyn LedgerStore>> {
        let path = self.config.ledger_path();
        debug!(backend = %self.config.ledger.backend, path = %path.display(), "opening ledger");
        let store: Arc<dyn LedgerStore> = match self.config.ledger.backend {
            LedgerBackend::File => Arc::new(FileStore::new(path)),
            LedgerBackend::Sqlite => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let url = format!("sqlite://{}?mode=rwc", path.display());
                Arc::new(SqliteStore::new(&url).await?)
            },
            LedgerBackend::Memory => {
                warn!("memory ledger: this run cannot be resumed and will not be remembered");
                Arc::new(InMemoryStore::new())
            },
        };
        Ok(store)
    }

    pub fn baselines(&self) -> anyhow::Result<Arc<BaselineStore>> {
        let path = BaselineStore::default_path(&self.config.state_dir());
        Ok(Arc::new(BaselineStore::open(path)?))
    }

    /// Config overrides first, then `--set` assignments on top.
    pub fn overrides(&self, assignments: &[String]) -> anyhow::Result<Overrides> {
        let mut overrides = Overrides::from_map(&self.config.overrides);
        for assignment in assignments {
            overrides
                .insert_assignment(assignment)
                .map_err(|e| anyhow::anyhow!("--set {assignment}: {e}"))?;
        }
        Ok(overrides)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, modsmith_config::parse_config, serde_json::json};

    fn workspace(toml: &str) -> Workspace {
        Workspace {
            config: parse_config(toml, Path::new("modsmith.toml")).unwrap(),
            config_path: None,
        }
    }

    #[test]
    fn cli_assignments_override_config() {
        let ws = workspace(
            r#"
[overrides]
"lang/python.installPath" = "src"
port = 80
"#,
        );
        let overrides = ws
            .overrides(&["port=8080".into(), "lang/python.installPath=app".into()])
            .unwrap();
        assert_eq!(overrides.get("lang/python", "installPath"), Some(&json!("app")));
        assert_eq!(overrides.get("tools/lint", "port"), Some(&json!(8080)));
    }

    #[test]
    fn catalog_flag_wins_over_config() {
        let ws = workspace("[catalog]\npath = \"catalog.toml\"\n");
        assert_eq!(ws.catalog_path(None).unwrap(), PathBuf::from("catalog.toml"));
        assert_eq!(
            ws.catalog_path(Some("other.yaml".into())).unwrap(),
            PathBuf::from("other.yaml")
        );
        assert!(workspace("").catalog_path(None).is_err());
    }

    #[test]
    fn state_dir_follows_target_root() {
        let mut ws = workspace("");
        ws.set_target_root(PathBuf::from("/tmp/project"));
        assert_eq!(
            ws.config.ledger_path(),
            PathBuf::from("/tmp/project/.modsmith/ledger")
        );
    }

    #[tokio::test]
    async fn file_ledger_lives_under_state_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ws = workspace("");
        ws.set_target_root(tmp.path().to_path_buf());
        let store = ws.ledger_store().await.unwrap();
        assert!(store.list_runs().await.unwrap().is_empty());
    }
}
