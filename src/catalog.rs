use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Language;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    class_label: String,
    name_ja: String,
    name_en: String,
    gripping_height: String,
    description_ja: String,
    description_en: String,
}

/// One graspable workpiece the detector can report, with the height at which
/// the gripper should close on it.
#[derive(Debug, Clone, Serialize)]
pub struct Workpiece {
    pub name: String,
    pub gripping_height: f64,
    pub description: String,
}

/// The workpiece catalog, loaded from a UTF-8 CSV and localized at load time.
pub struct WorkpieceCatalog {
    entries: BTreeMap<String, Workpiece>,
}

impl WorkpieceCatalog {
    pub fn load(path: &Path, lang: Language) -> Result<Self, Box<dyn std::error::Error>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut entries = BTreeMap::new();
        for row in reader.deserialize() {
            let row: CatalogRow = row?;
            let gripping_height = match row.gripping_height.trim().parse::<f64>() {
                Ok(height) if height.is_finite() => height,
                _ => {
                    log::warn!(
                        "Workpiece \"{}\" has malformed gripping_height \"{}\", using 0",
                        row.class_label,
                        row.gripping_height
                    );
                    0.0
                }
            };
            let (name, description) = match lang {
                Language::Ja => (row.name_ja, row.description_ja),
                Language::En => (row.name_en, row.description_en),
            };
            entries.insert(
                row.class_label,
                Workpiece {
                    name,
                    gripping_height,
                    description,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&Workpiece> {
        self.entries.get(label)
    }

    /// The catalog as the tool-facing JSON object: label → workpiece.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
class_label,name_ja,name_en,gripping_height,description_ja,description_en
earplug_case,耳栓ケース,Earplug case,43.0,円筒形のケース。,A cylindrical case.
base_tray,配置トレイ,Base tray,bad,配置用の平坦な面。,A flat placement surface.
";

    fn write_temp(tag: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "armvision-catalog-{}-{}.csv",
            std::process::id(),
            tag
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_localized_english() {
        let path = write_temp("en");
        let catalog = WorkpieceCatalog::load(&path, Language::En).unwrap();
        std::fs::remove_file(&path).unwrap();

        let case = catalog.get("earplug_case").unwrap();
        assert_eq!(case.name, "Earplug case");
        assert_eq!(case.gripping_height, 43.0);
        assert_eq!(case.description, "A cylindrical case.");
    }

    #[test]
    fn test_malformed_height_falls_back_to_zero() {
        let path = write_temp("fallback");
        let catalog = WorkpieceCatalog::load(&path, Language::Ja).unwrap();
        std::fs::remove_file(&path).unwrap();

        let tray = catalog.get("base_tray").unwrap();
        assert_eq!(tray.gripping_height, 0.0);
        assert_eq!(tray.name, "配置トレイ");
    }

    #[test]
    fn test_to_json_shape() {
        let path = write_temp("json");
        let catalog = WorkpieceCatalog::load(&path, Language::En).unwrap();
        std::fs::remove_file(&path).unwrap();

        let json = catalog.to_json();
        assert_eq!(json["earplug_case"]["gripping_height"], 43.0);
        assert!(json["base_tray"]["name"].is_string());
    }
}
