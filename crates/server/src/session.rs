//! Per-viewer session state and interest management.
//!
//! A session lives exactly as long as its connection; nothing here survives a
//! reconnect. The diff is recomputed from scratch on every position report,
//! so a viewer that missed an update heals on its next report.

use florafield_engine::{FlowerField, StoreError};
use florafield_protocol::{FieldDelta, FlowerPacket, PositionUpdate, Vec2};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ViewerSession {
    pub last_position: Option<Vec2>,
    pub loaded: HashSet<String>,
}

/// Split a candidate set against the viewer's loaded set.
///
/// `to_add` are candidates the viewer lacks; `to_remove` are loaded flowers no
/// longer in range. The two never overlap, and applying both to the loaded set
/// yields exactly the candidate set.
pub fn interest_diff(
    candidates: &[String],
    loaded: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let candidate_set: HashSet<&str> = candidates.iter().map(String::as_str).collect();
    let to_add = candidates
        .iter()
        .filter(|id| !loaded.contains(*id))
        .cloned()
        .collect();
    let to_remove = loaded
        .iter()
        .filter(|id| !candidate_set.contains(id.as_str()))
        .cloned()
        .collect();
    (to_add, to_remove)
}

/// Handle one position report: query the field around the reported position,
/// diff against the viewer's reported loaded set, and advance the session to
/// the candidate set. Records for absent `to_add` ids are silently dropped.
pub fn position_report(
    field: &FlowerField,
    session: &mut ViewerSession,
    report: &PositionUpdate,
    flower_range: f64,
) -> Result<(Vec<FlowerPacket>, Vec<String>), StoreError> {
    session.last_position = Some(report.position);
    // The viewer's own report is authoritative for what it has loaded.
    session.loaded = report.loaded_flower_ids.iter().cloned().collect();

    let candidates = field.flowers_around(report.position.x, report.position.y, flower_range);
    let (to_add, to_remove) = interest_diff(&candidates, &session.loaded);
    let packets = field.fetch(&to_add)?;

    session.loaded = candidates.into_iter().collect();
    Ok((packets, to_remove))
}

/// Narrow a broadcast delta to what one viewer should receive.
///
/// Removals always pass through (a delete for an unknown id is a no-op on the
/// viewer). Adds outside the viewer's interest radius around its last known
/// position are suppressed; the viewer picks them up from a later position
/// report instead. The session's loaded set tracks what was forwarded.
pub fn filter_delta(
    session: &mut ViewerSession,
    flower_range: f64,
    delta: &FieldDelta,
) -> (Vec<FlowerPacket>, Vec<String>) {
    for id in &delta.removed {
        session.loaded.remove(id);
    }
    let adds: Vec<FlowerPacket> = match session.last_position {
        Some(pos) => delta
            .added
            .iter()
            .filter(|p| p.location.distance(pos) <= flower_range)
            .cloned()
            .collect(),
        // No position reported yet: the viewer is not looking at anything.
        None => Vec::new(),
    };
    for p in &adds {
        session.loaded.insert(p.id.clone());
    }
    (adds, delta.removed.clone())
}
