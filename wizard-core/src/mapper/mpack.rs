//! Management packs offered by the registries.

use super::{Mapper, MapperConfig, Record, RecordStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wizard_error::{WizardError, WizardResult};

pub const MPACK_MODEL: &str = "mpack";
pub const MPACK_VERSION_MODEL: &str = "mpack_version";

/// A pack chosen for download, keyed `name-version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedMpack {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub download_url: String,
}

pub fn mpack_version_id(name: &str, version: &str) -> String {
    format!("{}-{}", name, version)
}

pub struct RegistryMpackMapper {
    mpack: MapperConfig,
    version: MapperConfig,
}

impl Default for RegistryMpackMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryMpackMapper {
    pub fn new() -> Self {
        Self {
            mpack: MapperConfig::new()
                .field("id", "RegistryMpackInfo.mpack_name")
                .field("name", "RegistryMpackInfo.mpack_name")
                .field("mpack_id", "RegistryMpackInfo.mpack_id")
                .field("display_name", "RegistryMpackInfo.mpack_display_name")
                .field("description", "RegistryMpackInfo.mpack_description")
                .field("logo_url", "RegistryMpackInfo.mpack_logo_uri")
                .field("registry_id", "RegistryMpackInfo.registry_id")
                .pluck("versions", "versions", "RegistryMpackVersionInfo.mpack_version"),
            version: MapperConfig::new()
                .field("version", "RegistryMpackVersionInfo.mpack_version")
                .field("mpack_name", "RegistryMpackVersionInfo.mpack_name")
                .field("mpack_url", "RegistryMpackVersionInfo.mpack_uri")
                .field("doc_url", "RegistryMpackVersionInfo.mpack_doc_uri"),
        }
    }
}

fn str_field<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

impl Mapper for RegistryMpackMapper {
    fn map(&self, json: &Value, store: &mut RecordStore) -> WizardResult<usize> {
        let mut mpacks = Vec::new();
        let mut versions = Vec::new();
        let registries = json
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for registry in registries {
            let entries = registry
                .get("mpacks")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for entry in entries {
                let mpack = self.mpack.parse(entry);
                let Some(name) = str_field(&mpack, "name").map(str::to_string) else {
                    log::warn!("Registry entry without mpack_name skipped");
                    continue;
                };
                let version_items = entry
                    .get("versions")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for item in version_items {
                    let mut version = self.version.parse(item);
                    let Some(number) = str_field(&version, "version").map(str::to_string) else {
                        continue;
                    };
                    version.insert(
                        "id".to_string(),
                        Value::String(mpack_version_id(&name, &number)),
                    );
                    version.insert("mpack_id".to_string(), Value::String(name.clone()));
                    versions.push(version);
                }
                mpacks.push(mpack);
            }
        }

        let mut loaded = store.load_many(MPACK_VERSION_MODEL, versions);
        loaded += store.load_many(MPACK_MODEL, mpacks);
        Ok(loaded)
    }
}

/// Resolves `(name, version)` choices against mapped registry records.
pub fn select_mpacks(
    store: &RecordStore,
    choices: &[(String, String)],
) -> WizardResult<Vec<SelectedMpack>> {
    choices
        .iter()
        .map(|(name, version)| {
            let id = mpack_version_id(name, version);
            let record = store
                .find(MPACK_VERSION_MODEL, &id)
                .ok_or_else(|| WizardError::MissingData {
                    wizard: "selectMpacks".to_string(),
                    key: id.clone(),
                })?;
            let download_url = str_field(record, "mpack_url")
                .ok_or_else(|| WizardError::MissingData {
                    wizard: "selectMpacks".to_string(),
                    key: format!("{}.mpack_uri", id),
                })?
                .to_string();
            let display_name = store
                .find(MPACK_MODEL, name)
                .and_then(|m| str_field(m, "display_name"))
                .unwrap_or(name)
                .to_string();
            Ok(SelectedMpack {
                id,
                name: name.clone(),
                display_name,
                version: version.clone(),
                download_url,
            })
        })
        .collect()
}
