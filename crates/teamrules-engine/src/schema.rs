//! Compiled entity/relationship catalog.
//!
//! Built once from the `schema` config section. Policy compilation checks
//! every `data.<field>` and `data.ref(path)` against it, and stores use it to
//! maintain both directions of a link.

use std::collections::{BTreeMap, BTreeSet};

use teamrules_core::error::{ConfigError, PermError, Result};

use crate::config::{Has, SchemaSection};

/// One readable side of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSide {
    /// Entity type the label leads to.
    pub target: String,
    /// Label on the target pointing back.
    pub inverse: String,
    /// How many targets this side may hold.
    pub has: Has,
    /// How many records the target's `inverse` side may hold.
    pub inverse_has: Has,
}

#[derive(Debug, Default)]
struct EntityShape {
    attrs: BTreeSet<String>,
    links: BTreeMap<String, LinkSide>,
}

#[derive(Debug, Default)]
pub struct Schema {
    entities: BTreeMap<String, EntityShape>,
}

impl Schema {
    pub fn from_section(section: &SchemaSection) -> Result<Self> {
        let mut errors = Vec::new();
        let mut entities: BTreeMap<String, EntityShape> = BTreeMap::new();

        for (name, def) in &section.entities {
            if !is_name(name) {
                errors.push(ConfigError::Schema(format!("invalid entity type name `{name}`")));
                continue;
            }
            let mut shape = EntityShape::default();
            for attr in &def.attrs {
                if !is_name(attr) || attr == "id" {
                    errors.push(ConfigError::Schema(format!("{name}: invalid attribute `{attr}`")));
                } else if !shape.attrs.insert(attr.clone()) {
                    errors.push(ConfigError::Schema(format!("{name}: attribute `{attr}` declared twice")));
                }
            }
            entities.insert(name.clone(), shape);
        }

        for link in &section.links {
            for end in [&link.from, &link.to] {
                if !entities.contains_key(end) {
                    errors.push(ConfigError::Schema(format!(
                        "link {}.{} -> {}.{} references unknown entity type `{end}`",
                        link.from, link.forward, link.to, link.reverse
                    )));
                }
            }
            if !entities.contains_key(&link.from) || !entities.contains_key(&link.to) {
                continue;
            }

            let sides = [
                (&link.from, &link.forward, link.forward_has, &link.to, &link.reverse, link.reverse_has),
                (&link.to, &link.reverse, link.reverse_has, &link.from, &link.forward, link.forward_has),
            ];
            for (owner, label, has, target, inverse, inverse_has) in sides {
                let Some(shape) = entities.get_mut(owner) else {
                    continue;
                };
                if !is_name(label) || label == "id" {
                    errors.push(ConfigError::Schema(format!("{owner}: invalid link label `{label}`")));
                } else if shape.attrs.contains(label) || shape.links.contains_key(label) {
                    errors.push(ConfigError::Schema(format!(
                        "{owner}: link label `{label}` collides with an existing attribute or link"
                    )));
                } else {
                    shape.links.insert(
                        label.clone(),
                        LinkSide {
                            target: target.clone(),
                            inverse: inverse.clone(),
                            has,
                            inverse_has,
                        },
                    );
                }
            }
        }

        if !errors.is_empty() {
            return Err(PermError::Config(errors));
        }
        Ok(Self { entities })
    }

    pub fn has_entity(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    /// `id` is an attribute of every entity type.
    pub fn has_attr(&self, entity: &str, attr: &str) -> bool {
        attr == "id"
            || self
                .entities
                .get(entity)
                .is_some_and(|e| e.attrs.contains(attr))
    }

    pub fn link(&self, entity: &str, label: &str) -> Option<&LinkSide> {
        self.entities.get(entity).and_then(|e| e.links.get(label))
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(teamrules_core::expr::lexer::is_ident_start)
        && chars.all(teamrules_core::expr::lexer::is_ident_continue)
        && !matches!(s, "in" | "true" | "false" | "null")
}
