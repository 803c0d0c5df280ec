use std::sync::Arc;

use apikit_db::Database;
use jobs::{email::TemplateStore, JobClient};
use runtime::AppConfig;

use crate::deps::Probe;

/// Shared dependencies handed to every route. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Option<Database>,
    pub jobs: Option<JobClient>,
    pub templates: TemplateStore,
    probes: Arc<Vec<Arc<dyn Probe>>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let templates = TemplateStore::new(&config.email.templates_dir);
        Self {
            config: Arc::new(config),
            db: None,
            jobs: None,
            templates,
            probes: Arc::new(Vec::new()),
        }
    }

    pub fn with_db(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_jobs(mut self, jobs: JobClient) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_templates(mut self, templates: TemplateStore) -> Self {
        self.templates = templates;
        self
    }

    /// Register a dependency for `/status`.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        Arc::make_mut(&mut self.probes).push(probe);
        self
    }

    pub fn probes(&self) -> &[Arc<dyn Probe>] {
        &self.probes
    }
}
