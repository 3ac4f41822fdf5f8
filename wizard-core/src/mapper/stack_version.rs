//! Stack versions with their operating systems and repositories.
//!
//! Ids are concatenations other records rely on for lookups:
//! stack `name + version` (`HDP2.6`), operating system `version + os_name`
//! (`2.6redhat7`), repository `<os id>-<repo_id>`.

use super::{Mapper, MapperConfig, Record, RecordStore};
use serde_json::Value;
use wizard_error::WizardResult;

pub const STACK_MODEL: &str = "stack_version";
pub const OS_MODEL: &str = "operating_system";
pub const REPO_MODEL: &str = "repository";

pub struct StackVersionMapper {
    stack: MapperConfig,
    os: MapperConfig,
    repo: MapperConfig,
}

impl Default for StackVersionMapper {
    fn default() -> Self {
        Self::new()
    }
}

fn text(record: &Record, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl StackVersionMapper {
    pub fn new() -> Self {
        Self {
            stack: MapperConfig::new()
                .field("name", "StackVersion.name")
                .field("version", "StackVersion.version")
                .field("active", "StackVersion.active")
                .field("parent_stack_version", "StackVersion.parent_stack_version")
                .field("min_upgrade_version", "StackVersion.min_upgrade_version"),
            os: MapperConfig::new()
                .field("os_name", "OperatingSystems.os_name")
                .field("os_family", "OperatingSystems.os_family"),
            repo: MapperConfig::new()
                .field("repo_id", "Repositories.repo_id")
                .field("repo_name", "Repositories.repo_name")
                .field("base_url", "Repositories.base_url")
                .field("default_base_url", "Repositories.default_base_url")
                .field("latest_base_url", "Repositories.latest_base_url"),
        }
    }

    fn items(json: &Value, key: &str) -> Vec<Value> {
        json.get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

impl Mapper for StackVersionMapper {
    fn map(&self, json: &Value, store: &mut RecordStore) -> WizardResult<usize> {
        let mut stacks = Vec::new();
        let mut systems = Vec::new();
        let mut repos = Vec::new();

        for item in Self::items(json, "items") {
            let mut stack = self.stack.parse(&item);
            let version = text(&stack, "version");
            let stack_id = format!("{}{}", text(&stack, "name"), version);
            stack.insert("id".to_string(), Value::String(stack_id.clone()));

            let mut os_ids = Vec::new();
            for os_item in Self::items(&item, "operating_systems") {
                let mut os = self.os.parse(&os_item);
                let os_id = format!("{}{}", version, text(&os, "os_name"));
                os.insert("id".to_string(), Value::String(os_id.clone()));
                os.insert(
                    "stack_version_id".to_string(),
                    Value::String(stack_id.clone()),
                );

                let mut repo_ids = Vec::new();
                for repo_item in Self::items(&os_item, "repositories") {
                    let mut repo = self.repo.parse(&repo_item);
                    let repo_id = format!("{}-{}", os_id, text(&repo, "repo_id"));
                    repo.insert("id".to_string(), Value::String(repo_id.clone()));
                    repo.insert(
                        "operating_system_id".to_string(),
                        Value::String(os_id.clone()),
                    );
                    repo_ids.push(Value::String(repo_id));
                    repos.push(repo);
                }
                os.insert("repository_ids".to_string(), Value::Array(repo_ids));
                os_ids.push(Value::String(os_id));
                systems.push(os);
            }
            stack.insert("operating_system_ids".to_string(), Value::Array(os_ids));
            stacks.push(stack);
        }

        let mut loaded = store.load_many(REPO_MODEL, repos);
        loaded += store.load_many(OS_MODEL, systems);
        loaded += store.load_many(STACK_MODEL, stacks);
        log::debug!("Stack version mapper loaded {} records", loaded);
        Ok(loaded)
    }
}
