//! Markdown listing of a resolved catalog

use serde::Serialize;

use crate::model::{Entity, Group};

/// One section per entity type, in order of first appearance, with the
/// YAML form of every group and entity of that type.
pub fn render_markdown(groups: &[Group], entities: &[Entity]) -> Result<String, serde_yaml::Error> {
    let mut sections: Vec<(&str, Vec<String>)> = Vec::new();
    for group in groups {
        let block = item_block("Group", &group.apikey, group)?;
        push_block(&mut sections, group.entity_type(), block);
    }
    for entity in entities {
        let block = item_block("Entity", &entity.device_id, entity)?;
        push_block(&mut sections, entity.entity_type(), block);
    }

    let mut out = Vec::new();
    for (entity_type, blocks) in sections {
        out.push(format!("### {}\n", entity_type));
        out.extend(blocks);
    }
    Ok(out.join("\n"))
}

fn item_block<T: Serialize>(label: &str, key: &str, item: &T) -> Result<String, serde_yaml::Error> {
    Ok(format!("*{}: {}*\n\n{}", label, key, serde_yaml::to_string(item)?))
}

fn push_block<'a>(sections: &mut Vec<(&'a str, Vec<String>)>, entity_type: &'a str, block: String) {
    match sections.iter_mut().find(|(name, _)| *name == entity_type) {
        Some((_, blocks)) => blocks.push(block),
        None => sections.push((entity_type, vec![block])),
    }
}
