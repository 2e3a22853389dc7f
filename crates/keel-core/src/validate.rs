//! Tag validation against a structure version's typed attribute contract.

use crate::model::{StructureVersion, TagMap, ValueType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("tag '{key}' is not declared by structure version {structure_version_id}")]
    UnknownAttribute {
        key: String,
        structure_version_id: i64,
    },

    #[error("tag '{key}' must be {expected}, found {}", .found.map_or("no value", ValueType::as_str))]
    TypeMismatch {
        key: String,
        expected: ValueType,
        found: Option<ValueType>,
    },

    #[error("tag '{key}' is declared {declared} but holds a {held} value")]
    TagTypeConflict {
        key: String,
        declared: ValueType,
        held: ValueType,
    },

    #[error("attribute '{key}' declared by structure version {structure_version_id} is missing")]
    MissingAttribute {
        key: String,
        structure_version_id: i64,
    },
}

/// Checks a version's tags before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureValidator {
    /// Reject tag sets that omit a declared attribute.
    pub require_all_attributes: bool,
}

impl Default for StructureValidator {
    fn default() -> Self {
        Self {
            require_all_attributes: true,
        }
    }
}

impl StructureValidator {
    #[must_use]
    pub const fn new(require_all_attributes: bool) -> Self {
        Self {
            require_all_attributes,
        }
    }

    /// Every tag must hold a value of its declared type. With a structure,
    /// tags must also fit its attribute contract.
    ///
    /// # Errors
    ///
    /// Returns the first violation found, checking tags in key order.
    pub fn validate(
        &self,
        tags: &TagMap,
        structure: Option<&StructureVersion>,
    ) -> Result<(), ValidationError> {
        if let Some((key, (declared, held))) = tags
            .iter()
            .find_map(|(key, tag)| tag.type_conflict().map(|conflict| (key, conflict)))
        {
            return Err(ValidationError::TagTypeConflict {
                key: key.clone(),
                declared,
                held,
            });
        }

        let Some(structure) = structure else {
            return Ok(());
        };
        let declared = &structure.body.attributes;

        for (key, tag) in tags {
            let Some(&expected) = declared.get(key) else {
                return Err(ValidationError::UnknownAttribute {
                    key: key.clone(),
                    structure_version_id: structure.id(),
                });
            };
            let found = tag.value_type();
            if found != Some(expected) {
                return Err(ValidationError::TypeMismatch {
                    key: key.clone(),
                    expected,
                    found,
                });
            }
        }

        if self.require_all_attributes {
            if let Some(key) = declared.keys().find(|key| !tags.contains_key(*key)) {
                return Err(ValidationError::MissingAttribute {
                    key: key.clone(),
                    structure_version_id: structure.id(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RichVersion, StructureBody, Tag, Value, Version, tag_map, tags};
    use std::collections::BTreeMap;

    fn structure(attributes: &[(&str, ValueType)]) -> StructureVersion {
        Version {
            rich: RichVersion {
                id: 10,
                item_id: 1,
                tags: TagMap::new(),
                structure_version_id: None,
                reference: None,
                parameters: BTreeMap::new(),
            },
            body: StructureBody::new(attributes.iter().map(|&(k, t)| (k, t))),
        }
    }

    fn sample_tags() -> TagMap {
        tags([
            ("intfield", Some(Value::Integer(1))),
            ("strfield", Some(Value::from("1"))),
            ("boolfield", Some(Value::Boolean(true))),
        ])
    }

    #[test]
    fn no_structure_accepts_anything() {
        let validator = StructureValidator::default();
        assert_eq!(validator.validate(&sample_tags(), None), Ok(()));
    }

    #[test]
    fn exact_structure_accepts_matching_tags() {
        let s = structure(&[
            ("intfield", ValueType::Integer),
            ("strfield", ValueType::String),
            ("boolfield", ValueType::Boolean),
        ]);
        assert_eq!(StructureValidator::default().validate(&sample_tags(), Some(&s)), Ok(()));
    }

    #[test]
    fn undeclared_key_is_rejected() {
        let s = structure(&[("intfield", ValueType::Integer), ("strfield", ValueType::String)]);
        let err = StructureValidator::new(false)
            .validate(&sample_tags(), Some(&s))
            .expect_err("boolfield is undeclared");
        assert!(matches!(err, ValidationError::UnknownAttribute { ref key, .. } if key == "boolfield"));
    }

    #[test]
    fn wrong_type_is_rejected() {
        let s = structure(&[
            ("intfield", ValueType::Integer),
            ("strfield", ValueType::String),
            ("boolfield", ValueType::String),
        ]);
        let err = StructureValidator::default()
            .validate(&sample_tags(), Some(&s))
            .expect_err("boolfield should be a string");
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                key: "boolfield".into(),
                expected: ValueType::String,
                found: Some(ValueType::Boolean),
            }
        );
    }

    #[test]
    fn missing_attribute_depends_on_mode() {
        let s = structure(&[("intfield", ValueType::Integer), ("extra", ValueType::Long)]);
        let subset = tags([("intfield", Some(Value::Integer(3)))]);

        assert_eq!(StructureValidator::new(false).validate(&subset, Some(&s)), Ok(()));
        assert!(matches!(
            StructureValidator::new(true).validate(&subset, Some(&s)),
            Err(ValidationError::MissingAttribute { ref key, .. }) if key == "extra"
        ));
    }

    #[test]
    fn untyped_valueless_tag_matches_no_type() {
        let s = structure(&[("flag", ValueType::Boolean)]);
        let err = StructureValidator::default()
            .validate(&tags([("flag", None)]), Some(&s))
            .expect_err("no type at all");
        assert_eq!(err.to_string(), "tag 'flag' must be boolean, found no value");
    }

    #[test]
    fn declared_type_stands_in_for_missing_value() {
        let s = structure(&[("flag", ValueType::Boolean)]);
        let typed = tag_map([Tag::declared("flag", ValueType::Boolean, None)]);
        assert_eq!(StructureValidator::default().validate(&typed, Some(&s)), Ok(()));

        let wrong = tag_map([Tag::declared("flag", ValueType::Long, None)]);
        assert!(matches!(
            StructureValidator::default().validate(&wrong, Some(&s)),
            Err(ValidationError::TypeMismatch {
                found: Some(ValueType::Long),
                ..
            })
        ));
    }

    #[test]
    fn declared_type_must_match_value_even_without_structure() {
        let conflicting = tag_map([Tag::declared("rows", ValueType::Integer, Some(Value::Long(3)))]);
        assert_eq!(
            StructureValidator::default().validate(&conflicting, None),
            Err(ValidationError::TagTypeConflict {
                key: "rows".into(),
                declared: ValueType::Integer,
                held: ValueType::Long,
            })
        );
    }
}
