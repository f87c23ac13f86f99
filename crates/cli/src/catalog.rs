//! Exercise catalog used by the `search` subcommand.

use std::path::Path;

use anyhow::{Context, Result};
use liftlog_search::Searchable;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub name: String,
    pub muscle_group: String,
    pub equipment: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Exercise {
    fn new(name: &str, muscle_group: &str, equipment: &str, tags: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            muscle_group: muscle_group.to_string(),
            equipment: equipment.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Searchable for Exercise {
    fn search_text(&self) -> String {
        format!("{} {} {}", self.name, self.muscle_group, self.tags.join(" "))
    }

    fn filter_value(&self, field: &str) -> Option<Value> {
        match field {
            "name" => Some(Value::String(self.name.clone())),
            "muscle_group" => Some(Value::String(self.muscle_group.clone())),
            "equipment" => Some(Value::String(self.equipment.clone())),
            "tags" => Some(Value::Array(self.tags.iter().cloned().map(Value::String).collect())),
            _ => None,
        }
    }
}

/// Load a catalog from a JSON array file.
pub fn load(path: &Path) -> Result<Vec<Exercise>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse catalog {}", path.display()))
}

pub fn sample() -> Vec<Exercise> {
    vec![
        Exercise::new("Back Squat", "legs", "barbell", &["compound"]),
        Exercise::new("Front Squat", "legs", "barbell", &["compound"]),
        Exercise::new("Goblet Squat", "legs", "dumbbell", &[]),
        Exercise::new("Bulgarian Split Squat", "legs", "dumbbell", &["unilateral"]),
        Exercise::new("Romanian Deadlift", "hamstrings", "barbell", &["hinge"]),
        Exercise::new("Deadlift", "back", "barbell", &["compound", "hinge"]),
        Exercise::new("Bench Press", "chest", "barbell", &["compound", "push"]),
        Exercise::new("Incline Dumbbell Press", "chest", "dumbbell", &["push"]),
        Exercise::new("Overhead Press", "shoulders", "barbell", &["compound", "push"]),
        Exercise::new("Lateral Raise", "shoulders", "dumbbell", &["isolation"]),
        Exercise::new("Pull Up", "back", "bodyweight", &["compound", "pull"]),
        Exercise::new("Barbell Row", "back", "barbell", &["compound", "pull"]),
        Exercise::new("Seated Cable Row", "back", "cable", &["pull"]),
        Exercise::new("Bicep Curl", "arms", "dumbbell", &["isolation", "pull"]),
        Exercise::new("Triceps Pushdown", "arms", "cable", &["isolation", "push"]),
        Exercise::new("Plank", "core", "bodyweight", &["isometric"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tags_filter_as_array() {
        let deadlift = sample().into_iter().find(|e| e.name == "Deadlift").unwrap();
        assert_eq!(deadlift.filter_value("tags"), Some(json!(["compound", "hinge"])));
        assert_eq!(deadlift.filter_value("equipment"), Some(json!("barbell")));
        assert_eq!(deadlift.filter_value("weight"), None);
        assert!(deadlift.search_text().contains("back"));
    }

    #[test]
    fn catalog_json_tags_default_to_empty() {
        let raw = r#"[{"name": "Dip", "muscle_group": "arms", "equipment": "bodyweight"}]"#;
        let parsed: Vec<Exercise> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed, vec![Exercise::new("Dip", "arms", "bodyweight", &[])]);
    }
}
