// src/db/echo/graph.rs
// L3 entity-relation graph: entity upsert, appended relations, and
// bounded breadth-first traversal.

use crate::db::{new_id, now_ts, parse_ts};
use crate::types::{Entity, RelatedEntity, Relation, RelationType};
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use tracing::debug;

fn row_to_entity(row: &Row) -> rusqlite::Result<Entity> {
    let type_raw: String = row.get("entity_type")?;
    Ok(Entity {
        id: row.get("id")?,
        entity_type: crate::types::EntityType::from_str(&type_raw).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown entity type {type_raw:?}").into(),
            )
        })?,
        value: row.get("value")?,
        canonical_form: row.get("canonical_form")?,
        chat_id: row.get("chat_id")?,
        first_seen_at: parse_ts(&row.get::<_, String>("first_seen_at")?),
        last_seen_at: parse_ts(&row.get::<_, String>("last_seen_at")?),
    })
}

/// Upsert an entity on (type, value, chat). A NULL chat_id means global;
/// the lookup uses `chat_id IS ?` so globals dedup correctly too. On
/// conflict, last_seen_at advances and a provided canonical_form fills a
/// missing one.
pub fn upsert_entity_sync(
    conn: &Connection,
    entity_type: crate::types::EntityType,
    value: &str,
    chat_id: Option<&str>,
    canonical_form: Option<&str>,
) -> rusqlite::Result<Entity> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM l3_entities
             WHERE entity_type = ?1 AND value = ?2 AND chat_id IS ?3",
            rusqlite::params![entity_type.as_str(), value, chat_id],
            |row| row.get(0),
        )
        .optional()?;

    let now = now_ts();
    let id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE l3_entities
                 SET last_seen_at = ?1,
                     canonical_form = COALESCE(canonical_form, ?2)
                 WHERE id = ?3",
                rusqlite::params![now, canonical_form, id],
            )?;
            id
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO l3_entities
                    (id, entity_type, value, canonical_form, chat_id, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, entity_type.as_str(), value, canonical_form, chat_id, now],
            )?;
            debug!("Entity {} ({}) created", value, entity_type.as_str());
            id
        }
    };

    conn.query_row(
        "SELECT id, entity_type, value, canonical_form, chat_id, first_seen_at, last_seen_at
         FROM l3_entities WHERE id = ?1",
        [&id],
        row_to_entity,
    )
}

/// Append a relation between two entities. Never deduplicated: repeated
/// observations accumulate as separate rows.
pub fn add_relation_sync(
    conn: &Connection,
    source_entity_id: &str,
    target_entity_id: &str,
    relation_type: RelationType,
    context_message_id: Option<&str>,
    confidence: f32,
) -> rusqlite::Result<Relation> {
    let id = new_id();
    let now = now_ts();

    conn.execute(
        "INSERT INTO l3_relations
            (id, source_entity_id, target_entity_id, relation_type,
             context_message_id, confidence, is_muted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        rusqlite::params![
            id,
            source_entity_id,
            target_entity_id,
            relation_type.as_str(),
            context_message_id,
            confidence.clamp(0.0, 1.0),
            now
        ],
    )?;

    Ok(Relation {
        id,
        source_entity_id: source_entity_id.to_string(),
        target_entity_id: target_entity_id.to_string(),
        relation_type,
        context_message_id: context_message_id.map(|s| s.to_string()),
        confidence: confidence.clamp(0.0, 1.0),
        is_muted: false,
        created_at: parse_ts(&now),
    })
}

/// Breadth-first traversal from every entity whose value matches.
///
/// Seeds are scoped to the chat plus globals when a chat is given, globals
/// only otherwise. Edges are undirected for traversal and muted relations
/// are skipped. The result excludes the seeds; each entity appears once at
/// its minimum distance (<= hops).
pub fn get_related_sync(
    conn: &Connection,
    value: &str,
    chat_id: Option<&str>,
    hops: u32,
) -> rusqlite::Result<Vec<RelatedEntity>> {
    let seeds: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM l3_entities
             WHERE value = ?1 AND (chat_id IS NULL OR chat_id IS ?2)",
        )?;
        let rows = stmt.query_map(rusqlite::params![value, chat_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    if seeds.is_empty() || hops == 0 {
        return Ok(Vec::new());
    }

    let mut visited: HashSet<String> = seeds.iter().cloned().collect();
    let mut queue: VecDeque<(String, u32)> = seeds.into_iter().map(|id| (id, 0)).collect();
    let mut related = Vec::new();

    let mut neighbor_stmt = conn.prepare(
        "SELECT source_entity_id, target_entity_id FROM l3_relations
         WHERE (source_entity_id = ?1 OR target_entity_id = ?1) AND is_muted = 0",
    )?;

    while let Some((current, distance)) = queue.pop_front() {
        if distance >= hops {
            continue;
        }

        let neighbors: Vec<(String, String)> = neighbor_stmt
            .query_map([&current], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;

        for (source, target) in neighbors {
            let next = if source == current { target } else { source };
            if !visited.insert(next.clone()) {
                continue;
            }

            let entity = conn.query_row(
                "SELECT id, entity_type, value, canonical_form, chat_id, first_seen_at, last_seen_at
                 FROM l3_entities WHERE id = ?1",
                [&next],
                row_to_entity,
            )?;
            related.push(RelatedEntity {
                entity,
                distance: distance + 1,
            });
            queue.push_back((next, distance + 1));
        }
    }

    Ok(related)
}

/// Fetch one entity by id
pub fn get_entity_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<Entity>> {
    conn.query_row(
        "SELECT id, entity_type, value, canonical_form, chat_id, first_seen_at, last_seen_at
         FROM l3_entities WHERE id = ?1",
        [id],
        row_to_entity,
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;
    use crate::types::EntityType;

    #[test]
    fn upsert_returns_same_id_and_advances_last_seen() {
        let conn = setup_test_connection();
        let first =
            upsert_entity_sync(&conn, EntityType::Technology, "rust", Some("c1"), None).unwrap();
        // Backdate so the bump is observable
        conn.execute(
            "UPDATE l3_entities SET last_seen_at = '2020-01-01T00:00:00.000000Z' WHERE id = ?1",
            [&first.id],
        )
        .unwrap();

        let second =
            upsert_entity_sync(&conn, EntityType::Technology, "rust", Some("c1"), None).unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.last_seen_at > parse_ts("2020-01-01T00:00:00.000000Z"));
        assert_eq!(second.first_seen_at, first.first_seen_at);
    }

    #[test]
    fn upsert_fills_missing_canonical_form_only() {
        let conn = setup_test_connection();
        upsert_entity_sync(&conn, EntityType::Tool, "pg", Some("c1"), None).unwrap();
        let filled =
            upsert_entity_sync(&conn, EntityType::Tool, "pg", Some("c1"), Some("postgres"))
                .unwrap();
        assert_eq!(filled.canonical_form.as_deref(), Some("postgres"));

        let unchanged =
            upsert_entity_sync(&conn, EntityType::Tool, "pg", Some("c1"), Some("postgresql"))
                .unwrap();
        assert_eq!(unchanged.canonical_form.as_deref(), Some("postgres"));
    }

    #[test]
    fn global_entities_dedup_on_null_chat() {
        let conn = setup_test_connection();
        let a = upsert_entity_sync(&conn, EntityType::Concept, "memory", None, None).unwrap();
        let b = upsert_entity_sync(&conn, EntityType::Concept, "memory", None, None).unwrap();
        assert_eq!(a.id, b.id);

        // A chat-scoped entity of the same value is distinct
        let scoped =
            upsert_entity_sync(&conn, EntityType::Concept, "memory", Some("c1"), None).unwrap();
        assert_ne!(a.id, scoped.id);
    }

    #[test]
    fn relations_are_appended_not_deduped() {
        let conn = setup_test_connection();
        let a = upsert_entity_sync(&conn, EntityType::Tool, "a", Some("c1"), None).unwrap();
        let b = upsert_entity_sync(&conn, EntityType::Tool, "b", Some("c1"), None).unwrap();

        add_relation_sync(&conn, &a.id, &b.id, RelationType::Uses, Some("m1"), 1.0).unwrap();
        add_relation_sync(&conn, &a.id, &b.id, RelationType::Uses, Some("m2"), 0.5).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM l3_relations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn traversal_respects_hop_limit() {
        let conn = setup_test_connection();
        let a = upsert_entity_sync(&conn, EntityType::Concept, "A", Some("c1"), None).unwrap();
        let b = upsert_entity_sync(&conn, EntityType::Concept, "B", Some("c1"), None).unwrap();
        let c = upsert_entity_sync(&conn, EntityType::Concept, "C", Some("c1"), None).unwrap();
        add_relation_sync(&conn, &a.id, &b.id, RelationType::Uses, None, 1.0).unwrap();
        add_relation_sync(&conn, &b.id, &c.id, RelationType::DependsOn, None, 1.0).unwrap();

        let two_hops = get_related_sync(&conn, "A", Some("c1"), 2).unwrap();
        let found: Vec<(&str, u32)> = two_hops
            .iter()
            .map(|r| (r.entity.value.as_str(), r.distance))
            .collect();
        assert!(found.contains(&("B", 1)));
        assert!(found.contains(&("C", 2)));
        assert_eq!(found.len(), 2);

        let one_hop = get_related_sync(&conn, "A", Some("c1"), 1).unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].entity.value, "B");
    }

    #[test]
    fn traversal_is_undirected_and_excludes_seeds() {
        let conn = setup_test_connection();
        let a = upsert_entity_sync(&conn, EntityType::Concept, "A", Some("c1"), None).unwrap();
        let b = upsert_entity_sync(&conn, EntityType::Concept, "B", Some("c1"), None).unwrap();
        // Edge points B -> A; traversal from A must still reach B
        add_relation_sync(&conn, &b.id, &a.id, RelationType::RelatedTo, None, 1.0).unwrap();

        let related = get_related_sync(&conn, "A", Some("c1"), 2).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].entity.value, "B");
        assert!(related.iter().all(|r| r.entity.value != "A"));
    }

    #[test]
    fn traversal_skips_muted_relations() {
        let conn = setup_test_connection();
        let a = upsert_entity_sync(&conn, EntityType::Concept, "A", Some("c1"), None).unwrap();
        let b = upsert_entity_sync(&conn, EntityType::Concept, "B", Some("c1"), None).unwrap();
        let rel = add_relation_sync(&conn, &a.id, &b.id, RelationType::Uses, None, 1.0).unwrap();
        conn.execute("UPDATE l3_relations SET is_muted = 1 WHERE id = ?1", [&rel.id])
            .unwrap();

        assert!(get_related_sync(&conn, "A", Some("c1"), 2).unwrap().is_empty());
    }

    #[test]
    fn cycles_terminate_via_visited_set() {
        let conn = setup_test_connection();
        let a = upsert_entity_sync(&conn, EntityType::Concept, "A", Some("c1"), None).unwrap();
        let b = upsert_entity_sync(&conn, EntityType::Concept, "B", Some("c1"), None).unwrap();
        add_relation_sync(&conn, &a.id, &b.id, RelationType::Uses, None, 1.0).unwrap();
        add_relation_sync(&conn, &b.id, &a.id, RelationType::Uses, None, 1.0).unwrap();

        let related = get_related_sync(&conn, "A", Some("c1"), 5).unwrap();
        assert_eq!(related.len(), 1);
    }

    #[test]
    fn seeds_include_globals_when_chat_given() {
        let conn = setup_test_connection();
        let global = upsert_entity_sync(&conn, EntityType::Concept, "A", None, None).unwrap();
        let b = upsert_entity_sync(&conn, EntityType::Concept, "B", None, None).unwrap();
        add_relation_sync(&conn, &global.id, &b.id, RelationType::Uses, None, 1.0).unwrap();

        let related = get_related_sync(&conn, "A", Some("c1"), 1).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].entity.value, "B");
    }
}
