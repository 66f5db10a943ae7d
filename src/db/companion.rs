// src/db/companion.rs
// L5 companion graph: concept co-occurrence nodes with reinforced,
// temporally decaying edges.
//
// Reinforcement blends the old weight with the new observation
// (0.7 / 0.3) and resets temporal decay; the consolidator multiplies
// decay down and prunes edges whose effective weight falls below
// threshold.

use super::{new_id, now_ts, parse_ts};
use crate::types::{CompanionEdge, CompanionNode, NeighborHit, NodeType};
use rusqlite::{Connection, OptionalExtension, Row};
use std::str::FromStr;
use tracing::debug;

/// Carry-over factor for the existing edge weight during reinforcement
const REINFORCE_KEEP: f32 = 0.7;
/// Contribution of the new observation during reinforcement
const REINFORCE_BLEND: f32 = 0.3;

fn row_to_node(row: &Row) -> rusqlite::Result<CompanionNode> {
    let type_raw: String = row.get("node_type")?;
    Ok(CompanionNode {
        id: row.get("id")?,
        node_type: NodeType::from_str(&type_raw).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown node type {type_raw:?}").into(),
            )
        })?,
        value: row.get("value")?,
        chat_id: row.get("chat_id")?,
        first_seen_at: parse_ts(&row.get::<_, String>("first_seen_at")?),
        last_seen_at: parse_ts(&row.get::<_, String>("last_seen_at")?),
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<CompanionEdge> {
    Ok(CompanionEdge {
        id: row.get("id")?,
        source_node_id: row.get("source_node_id")?,
        target_node_id: row.get("target_node_id")?,
        weight: row.get("weight")?,
        temporal_decay: row.get("temporal_decay")?,
        last_reinforced_at: parse_ts(&row.get::<_, String>("last_reinforced_at")?),
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

/// Upsert a node on (type, value, chat); bumps last_seen_at on conflict
pub fn upsert_node_sync(
    conn: &Connection,
    node_type: NodeType,
    value: &str,
    chat_id: Option<&str>,
) -> rusqlite::Result<CompanionNode> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM l5_nodes
             WHERE node_type = ?1 AND value = ?2 AND chat_id IS ?3",
            rusqlite::params![node_type.as_str(), value, chat_id],
            |row| row.get(0),
        )
        .optional()?;

    let now = now_ts();
    let id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE l5_nodes SET last_seen_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
            id
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO l5_nodes (id, node_type, value, chat_id, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![id, node_type.as_str(), value, chat_id, now],
            )?;
            id
        }
    };

    conn.query_row(
        "SELECT id, node_type, value, chat_id, first_seen_at, last_seen_at
         FROM l5_nodes WHERE id = ?1",
        [&id],
        row_to_node,
    )
}

/// Reinforce the edge between two nodes (looked up in either direction).
///
/// Existing edge: weight <- weight * 0.7 + strength * 0.3, decay resets
/// to 1.0. Missing edge: inserted with weight = strength.
pub fn reinforce_edge_sync(
    conn: &Connection,
    source_node_id: &str,
    target_node_id: &str,
    strength: f32,
) -> rusqlite::Result<CompanionEdge> {
    let existing: Option<(String, f32)> = conn
        .query_row(
            "SELECT id, weight FROM l5_edges
             WHERE (source_node_id = ?1 AND target_node_id = ?2)
                OR (source_node_id = ?2 AND target_node_id = ?1)",
            rusqlite::params![source_node_id, target_node_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let now = now_ts();
    let id = match existing {
        Some((id, weight)) => {
            let blended = weight * REINFORCE_KEEP + strength * REINFORCE_BLEND;
            conn.execute(
                "UPDATE l5_edges
                 SET weight = ?1, temporal_decay = 1.0, last_reinforced_at = ?2
                 WHERE id = ?3",
                rusqlite::params![blended, now, id],
            )?;
            id
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO l5_edges
                    (id, source_node_id, target_node_id, weight, temporal_decay,
                     last_reinforced_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1.0, ?5, ?5)",
                rusqlite::params![id, source_node_id, target_node_id, strength, now],
            )?;
            debug!("Edge created between {} and {}", source_node_id, target_node_id);
            id
        }
    };

    conn.query_row(
        "SELECT id, source_node_id, target_node_id, weight, temporal_decay,
                last_reinforced_at, created_at
         FROM l5_edges WHERE id = ?1",
        [&id],
        row_to_edge,
    )
}

/// Undirected neighbors of a node, strongest (weight * temporal_decay) first
pub fn neighbors_sync(
    conn: &Connection,
    node_id: &str,
    top_k: usize,
) -> rusqlite::Result<Vec<NeighborHit>> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.node_type, n.value, n.chat_id, n.first_seen_at, n.last_seen_at,
                e.weight * e.temporal_decay AS strength
         FROM l5_edges e
         JOIN l5_nodes n
           ON n.id = CASE WHEN e.source_node_id = ?1 THEN e.target_node_id
                          ELSE e.source_node_id END
         WHERE e.source_node_id = ?1 OR e.target_node_id = ?1
         ORDER BY strength DESC, n.value ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![node_id, top_k as i64], |row| {
        Ok(NeighborHit {
            node: row_to_node(row)?,
            strength: row.get("strength")?,
        })
    })?;
    rows.collect()
}

/// Multiply every edge's temporal_decay by `rate`. Returns rows touched.
pub fn decay_edges_sync(conn: &Connection, rate: f32) -> rusqlite::Result<usize> {
    let updated = conn.execute(
        "UPDATE l5_edges SET temporal_decay = temporal_decay * ?1",
        [rate],
    )?;
    if updated > 0 {
        debug!("Decayed {} companion edges", updated);
    }
    Ok(updated)
}

/// Delete edges whose effective weight fell below threshold.
/// Returns the number pruned.
pub fn prune_weak_edges_sync(conn: &Connection, threshold: f32) -> rusqlite::Result<usize> {
    let pruned = conn.execute(
        "DELETE FROM l5_edges WHERE weight * temporal_decay < ?1",
        [threshold],
    )?;
    if pruned > 0 {
        debug!("Pruned {} weak companion edges", pruned);
    }
    Ok(pruned)
}

/// Node and edge counts for one chat (stats). Edges count when either
/// endpoint belongs to the chat.
pub fn counts_sync(conn: &Connection, chat_id: &str) -> rusqlite::Result<(u64, u64)> {
    let nodes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM l5_nodes WHERE chat_id IS ?1",
        [chat_id],
        |row| row.get(0),
    )?;
    let edges: i64 = conn.query_row(
        "SELECT COUNT(*) FROM l5_edges e
         WHERE EXISTS (SELECT 1 FROM l5_nodes n
                       WHERE n.chat_id IS ?1
                         AND n.id IN (e.source_node_id, e.target_node_id))",
        [chat_id],
        |row| row.get(0),
    )?;
    Ok((nodes as u64, edges as u64))
}
