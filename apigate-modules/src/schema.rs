use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One of the field types a module schema can declare (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    Email,
    Uuid,
    Json,
    Bytes,
    Secret,
    Ref,
    Enum,
    Duration,
    Url,
    Strings,
    Ints,
}

impl FieldType {
    /// SQL storage type derivation (§4.8 rule 4).
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::String
            | FieldType::Email
            | FieldType::Uuid
            | FieldType::Url
            | FieldType::Timestamp
            | FieldType::Json
            | FieldType::Strings
            | FieldType::Ints
            | FieldType::Ref
            | FieldType::Enum
            | FieldType::Duration => "TEXT",
            FieldType::Int | FieldType::Bool => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::Bytes | FieldType::Secret => "BLOB",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    #[serde(rename = "type")]
    pub type_: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub lookup: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub constraints: Option<Constraints>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLevel {
    Public,
    User,
    Admin,
}

impl Default for AuthLevel {
    fn default() -> Self {
        AuthLevel::Admin
    }
}

/// A module action as authored in YAML. Built-ins (`list`, `get`, `create`,
/// `update`, `delete`) are synthesized at derivation time; anything else is
/// a custom action applying `set` over the located record (§4.9 step 3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub auth: AuthLevel,
    #[serde(default)]
    pub set: BTreeMap<String, Value>,
}

/// One of the three shapes a YAML hook entry may take (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookSpec {
    Emit { emit: String },
    Call { call: String },
    Dispatch { #[serde(rename = "type")] kind: String, #[serde(flatten)] config: BTreeMap<String, Value> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsSpec {
    #[serde(default = "default_true")]
    pub http: bool,
    #[serde(default = "default_true")]
    pub cli: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleMeta {
    #[serde(default)]
    pub implements: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

/// A module as authored in YAML (§4.8), before convention expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub schema: BTreeMap<String, Field>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
    /// keyed by `"action.phase"`, e.g. `"create.before"`.
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<HookSpec>>,
    #[serde(default)]
    pub channels: ChannelsSpec,
    #[serde(default)]
    pub meta: ModuleMeta,
}

impl Module {
    pub fn from_yaml(source: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }
}

const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("mouse", "mice"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("goose", "geese"),
];

/// Plurals whose singular ends in `fe` rather than `f` — the `ves` suffix
/// alone doesn't disambiguate (§4.8 rule 1 `f`/`fe` branch).
const FE_PLURALS: &[&str] = &["knives", "wives", "lives"];

/// English pluralization per §4.8 rule 1: irregulars, then sibilant-suffix
/// `+es`, then consonant-`y` → `ies`, then `f`/`fe` → `ves`, else `+s`.
pub fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if let Some((_, plural)) = IRREGULAR_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return plural.to_string();
    }

    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{word}es");
    }

    if lower.ends_with('y') {
        let stem = &word[..word.len() - 1];
        let preceding = stem.chars().last();
        let preceded_by_consonant = preceding.map(|c| !is_vowel(c)).unwrap_or(false);
        if preceded_by_consonant {
            return format!("{stem}ies");
        }
        return format!("{word}s");
    }

    if lower.ends_with("fe") {
        let stem = &word[..word.len() - 2];
        return format!("{stem}ves");
    }
    if lower.ends_with('f') {
        let stem = &word[..word.len() - 1];
        return format!("{stem}ves");
    }

    format!("{word}s")
}

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Inverse of [`pluralize`]: irregulars, then sibilant `+es`, then `ies` →
/// `y`, then `ves` → `f`/`fe`, else strip trailing `s` (§4.8 rule 1, §8
/// singularize ∘ pluralize round-trip).
pub fn singularize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if let Some((singular, _)) = IRREGULAR_PLURALS.iter().find(|(_, plural)| *plural == lower) {
        return singular.to_string();
    }

    if lower.ends_with("ies") && word.len() > 3 {
        let stem = &word[..word.len() - 3];
        return format!("{stem}y");
    }

    if lower.ends_with("ves") {
        let stem = &word[..word.len() - 3];
        if FE_PLURALS.contains(&lower.as_str()) {
            return format!("{stem}fe");
        }
        return format!("{stem}f");
    }

    if lower.ends_with("xes") || lower.ends_with("zes") || lower.ends_with("ches") || lower.ends_with("shes") {
        return word[..word.len() - 2].to_string();
    }
    if lower.ends_with("ses") {
        return word[..word.len() - 2].to_string();
    }

    if lower.ends_with('s') && !lower.ends_with("ss") {
        return word[..word.len() - 1].to_string();
    }

    word.to_string()
}

/// Built-in actions synthesized for every module (§4.8 rule 3).
pub const IMPLICIT_ACTIONS: &[&str] = &["list", "get", "create", "update", "delete"];

/// A module after convention expansion: implicit fields/actions resolved,
/// plural table/path names derived (§4.8).
#[derive(Debug, Clone)]
pub struct DerivedModule {
    pub name: String,
    pub table_name: String,
    pub base_path: String,
    pub fields: BTreeMap<String, Field>,
    pub actions: BTreeMap<String, ActionSpec>,
    pub hooks: BTreeMap<String, Vec<HookSpec>>,
    pub channels: ChannelsSpec,
}

impl DerivedModule {
    pub fn derive(module: Module) -> Self {
        let plural = pluralize(&module.name);
        let mut fields = BTreeMap::new();

        fields.insert(
            "id".to_string(),
            Field {
                type_: FieldType::Uuid,
                required: true,
                unique: true,
                lookup: true,
                internal: false,
                default: None,
                values: None,
                to: None,
                constraints: None,
                description: Some("primary identifier".to_string()),
            },
        );
        for (name, field) in module.schema {
            fields.insert(name, field);
        }
        fields.insert(
            "created_at".to_string(),
            implicit_timestamp_field("creation timestamp"),
        );
        fields.insert(
            "updated_at".to_string(),
            implicit_timestamp_field("last mutation timestamp"),
        );

        let mut actions = module.actions;
        for implicit in IMPLICIT_ACTIONS {
            actions.entry(implicit.to_string()).or_default();
        }

        Self {
            name: module.name,
            table_name: plural.clone(),
            base_path: plural,
            fields,
            actions,
            hooks: module.hooks,
            channels: module.channels,
        }
    }

    /// Fields eligible as `create` inputs: non-implicit (no `id`/timestamps),
    /// non-internal; fields with a default are optional (§4.8 rule 3).
    pub fn creatable_fields(&self) -> Vec<(&str, &Field)> {
        self.fields
            .iter()
            .filter(|(name, field)| !field.internal && *name != "id" && *name != "created_at" && *name != "updated_at")
            .map(|(n, f)| (n.as_str(), f))
            .collect()
    }

    pub fn lookup_fields(&self) -> Vec<(&str, &Field)> {
        self.fields.iter().filter(|(_, f)| f.lookup).map(|(n, f)| (n.as_str(), f)).collect()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.keys().map(|s| s.as_str()).collect()
    }
}

fn implicit_timestamp_field(description: &str) -> Field {
    Field {
        type_: FieldType::Timestamp,
        required: true,
        unique: false,
        lookup: false,
        internal: true,
        default: None,
        values: None,
        to: None,
        constraints: None,
        description: Some(description.to_string()),
    }
}
