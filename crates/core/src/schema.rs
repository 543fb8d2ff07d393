use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::field_value::FieldValue;
use crate::ids::EntityType;
use crate::record::EntityRecord;
use crate::timestamp::Timestamp;

/// Supplies the validation rule for a field. Implemented by whatever schema
/// layer the host has; `SchemaRegistry` is the stock implementation.
pub trait ValidationRules {
    fn validate(
        &self,
        entity_type: &EntityType,
        field: &str,
        value: &FieldValue,
    ) -> Result<(), ValidationError>;
}

/// The editable field kinds and the values each accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text { min_len: usize, max_len: usize },
    Number { min: Option<f64>, max: Option<f64> },
    Select { options: Vec<String> },
    MultiSelect { options: Vec<String> },
    Checkbox,
    Date,
    Reference,
}

impl FieldKind {
    pub fn text(max_len: usize) -> Self {
        Self::Text { min_len: 0, max_len }
    }

    pub fn required_text(max_len: usize) -> Self {
        Self::Text { min_len: 1, max_len }
    }

    pub fn select<S: Into<String>>(options: impl IntoIterator<Item = S>) -> Self {
        Self::Select {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    pub fn multi_select<S: Into<String>>(options: impl IntoIterator<Item = S>) -> Self {
        Self::MultiSelect {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    fn check(&self, value: &FieldValue) -> Result<(), String> {
        match self {
            FieldKind::Text { min_len, max_len } => {
                let s = value.as_text().ok_or_else(|| expected("text", value))?;
                let len = s.chars().count();
                if len < *min_len {
                    return Err(if *min_len == 1 {
                        "must not be empty".to_string()
                    } else {
                        format!("must be at least {min_len} characters")
                    });
                }
                if len > *max_len {
                    return Err(format!("must be at most {max_len} characters"));
                }
                Ok(())
            }
            FieldKind::Number { min, max } => {
                let n = value.as_number().ok_or_else(|| expected("number", value))?;
                if let Some(min) = min
                    && n < *min
                {
                    return Err(format!("must be at least {min}"));
                }
                if let Some(max) = max
                    && n > *max
                {
                    return Err(format!("must be at most {max}"));
                }
                Ok(())
            }
            FieldKind::Select { options } => {
                let s = value.as_text().ok_or_else(|| expected("text", value))?;
                check_option(options, s)
            }
            FieldKind::MultiSelect { options } => {
                let items = value.as_list().ok_or_else(|| expected("list", value))?;
                for item in items {
                    let s = item.as_text().ok_or_else(|| expected("text", item))?;
                    check_option(options, s)?;
                }
                Ok(())
            }
            FieldKind::Checkbox => value
                .as_boolean()
                .map(|_| ())
                .ok_or_else(|| expected("boolean", value)),
            FieldKind::Date => {
                let s = value.as_text().ok_or_else(|| expected("date", value))?;
                Timestamp::parse(s).map(|_| ()).map_err(|_| "invalid datetime".to_string())
            }
            FieldKind::Reference => match value.as_text() {
                Some(s) if !s.is_empty() => Ok(()),
                Some(_) => Err("must not be empty".to_string()),
                None => Err(expected("reference", value)),
            },
        }
    }
}

fn expected(what: &str, got: &FieldValue) -> String {
    format!("expected {what}, got {}", got.type_name())
}

fn check_option(options: &[String], s: &str) -> Result<(), String> {
    if options.iter().any(|o| o == s) {
        Ok(())
    } else {
        Err(format!("'{s}' is not one of: {}", options.join(", ")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldRule {
    pub fn validate(&self, field: &str, value: &FieldValue) -> Result<(), ValidationError> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err(ValidationError::new(field, "is required"))
            };
        }
        self.kind
            .check(value)
            .map_err(|message| ValidationError::new(field, message))
    }
}

/// Field rules for one entity type.
#[derive(Debug, Clone, Default)]
pub struct EntitySchema {
    fields: BTreeMap<String, FieldRule>,
}

impl EntitySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldRule {
                kind,
                nullable: false,
            },
        );
        self
    }

    pub fn optional(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldRule {
                kind,
                nullable: true,
            },
        );
        self
    }

    pub fn rule(&self, field: &str) -> Option<&FieldRule> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<EntityType, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, entity_type: impl Into<EntityType>, schema: EntitySchema) -> Self {
        self.entities.insert(entity_type.into(), schema);
        self
    }

    pub fn schema(&self, entity_type: &EntityType) -> Option<&EntitySchema> {
        self.entities.get(entity_type)
    }
}

impl ValidationRules for SchemaRegistry {
    fn validate(
        &self,
        entity_type: &EntityType,
        field: &str,
        value: &FieldValue,
    ) -> Result<(), ValidationError> {
        if EntityRecord::is_reserved(field) {
            return Err(ValidationError::new(field, "is read-only"));
        }
        let schema = self
            .entities
            .get(entity_type)
            .ok_or_else(|| ValidationError::new(field, format!("unknown entity type {entity_type}")))?;
        let rule = schema
            .rule(field)
            .ok_or_else(|| ValidationError::new(field, format!("unknown field on {entity_type}")))?;
        rule.validate(field, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks() -> SchemaRegistry {
        SchemaRegistry::new().register(
            "tasks",
            EntitySchema::new()
                .field("title", FieldKind::required_text(150))
                .optional("description", FieldKind::text(1000))
                .field("status", FieldKind::select(["todo", "in_progress", "done"]))
                .optional("due_date", FieldKind::Date)
                .optional("tags", FieldKind::multi_select(["ui", "backend"]))
                .field("estimate", FieldKind::Number { min: Some(0.0), max: Some(100.0) })
                .field("archived", FieldKind::Checkbox),
        )
    }

    #[test]
    fn accepts_valid_values() {
        let rules = tasks();
        let t = EntityType::from("tasks");
        assert!(rules.validate(&t, "title", &"Ship it".into()).is_ok());
        assert!(rules.validate(&t, "description", &FieldValue::Null).is_ok());
        assert!(rules.validate(&t, "status", &"done".into()).is_ok());
        assert!(rules.validate(&t, "due_date", &"2024-06-01T00:00:00Z".into()).is_ok());
        assert!(rules.validate(&t, "estimate", &FieldValue::Float(2.5)).is_ok());
        assert!(rules.validate(&t, "archived", &true.into()).is_ok());
        assert!(
            rules
                .validate(&t, "tags", &FieldValue::List(vec!["ui".into()]))
                .is_ok()
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let rules = tasks();
        let t = EntityType::from("tasks");
        let err = rules.validate(&t, "title", &"".into()).unwrap_err();
        assert_eq!(err.field, "title");
        assert_eq!(err.message, "must not be empty");
        assert!(rules.validate(&t, "title", &FieldValue::Null).is_err());
        assert!(rules.validate(&t, "title", &"x".repeat(151).into()).is_err());
        assert!(rules.validate(&t, "status", &"blocked".into()).is_err());
        assert!(rules.validate(&t, "estimate", &FieldValue::Integer(101)).is_err());
        assert!(rules.validate(&t, "due_date", &"soon".into()).is_err());
        assert!(
            rules
                .validate(&t, "tags", &FieldValue::List(vec!["infra".into()]))
                .is_err()
        );
    }

    #[test]
    fn rejects_reserved_and_unknown_fields() {
        let rules = tasks();
        let t = EntityType::from("tasks");
        assert!(rules.validate(&t, "updated_at", &"2024-06-01T00:00:00Z".into()).is_err());
        assert!(rules.validate(&t, "nope", &"x".into()).is_err());
        assert!(
            rules
                .validate(&EntityType::from("projects"), "title", &"x".into())
                .is_err()
        );
    }
}
