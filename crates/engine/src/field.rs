//! The flower field: one store plus one spatial index, mutated together.
//!
//! Every composite operation removes from or inserts into the store first and
//! the index second, inside a single call, so an error leaves at worst a
//! stored flower the index has not seen yet rather than a dangling index
//! entry. Callers hold one exclusive lock around the whole field (see the
//! crate docs), so readers never observe a half-applied operation.

use crate::quadtree::FlowerQuadtree;
use crate::store::{FlowerStore, StoreError};
use crate::new_flower_id;
use florafield_protocol::{FieldDelta, FlowerPacket, Vec2};
use rand::seq::SliceRandom;
use rand::Rng;
use std::f64::consts::{FRAC_PI_2, TAU};
use tracing::warn;

/// Offspring land just outside the exclusion radius of their parent.
const SPREAD_OFFSET_FACTOR: f64 = 1.1;

#[derive(Debug)]
pub struct FlowerField {
    store: FlowerStore,
    index: FlowerQuadtree,
}

impl FlowerField {
    pub fn new(store: FlowerStore, field_width: f64, field_height: f64) -> Self {
        Self {
            store,
            index: FlowerQuadtree::new(field_width, field_height),
        }
    }

    /// Populate the spatial index from the store. Returns the flower count.
    pub fn initialize(&mut self) -> Result<usize, StoreError> {
        self.index.clear();
        let locations = self.store.get_all_locations()?;
        let count = locations.len();
        for (id, loc) in locations {
            self.index.insert(loc.x, loc.y, &id);
        }
        Ok(count)
    }

    /// Insert flowers, evicting any existing flower within `exclusion_radius`
    /// of each new one. Flowers whose id is already present are skipped, which
    /// makes re-sent inserts idempotent. With a non-positive radius no
    /// eviction query runs at all.
    ///
    /// Store failures are logged and skip the affected packet; the rest of the
    /// batch still runs. Evictions already applied stay in the delta even when
    /// the insert that caused them fails, so viewers always hear about them.
    ///
    /// Returns the net delta: flowers actually inserted (and still standing)
    /// plus every evicted id.
    pub fn add_flowers(&mut self, packets: &[FlowerPacket], exclusion_radius: f64) -> FieldDelta {
        let mut delta = FieldDelta::default();
        for packet in packets {
            if self.index.contains(&packet.id) {
                continue;
            }
            if exclusion_radius > 0.0 {
                let crowded = self.index.query_circle(
                    packet.location.x,
                    packet.location.y,
                    exclusion_radius,
                );
                if !crowded.is_empty() {
                    if let Err(err) = self.store.remove_many(&crowded) {
                        warn!(flower = %packet.id, error = %err, "eviction failed, skipping insert");
                        continue;
                    }
                    self.index.remove_batch(&crowded);
                    delta.removed.extend(crowded);
                }
            }
            if let Err(err) = self.store.insert(packet) {
                warn!(flower = %packet.id, error = %err, "insert failed, flower dropped");
                continue;
            }
            self.index
                .insert(packet.location.x, packet.location.y, &packet.id);
            delta.added.push(packet.clone());
        }
        delta.normalize();
        delta
    }

    /// One growth tick: each flower is independently selected with
    /// probability `fraction`, the selection is shuffled and capped at
    /// `max_updates`, and every surviving parent spawns two mutated offspring
    /// just outside the exclusion radius, along perpendicular directions from
    /// a random base angle. A vanished or unreadable parent is skipped; the
    /// tick always runs to completion.
    pub fn spread_flowers(
        &mut self,
        rng: &mut impl Rng,
        fraction: f64,
        max_updates: usize,
        exclusion_radius: f64,
    ) -> FieldDelta {
        let p = fraction.clamp(0.0, 1.0);
        let mut selected: Vec<String> = self
            .index
            .all_ids()
            .into_iter()
            .filter(|_| rng.gen_bool(p))
            .collect();
        // Shuffle before truncating so the cap does not favor any region.
        selected.shuffle(rng);
        selected.truncate(max_updates);

        let mut delta = FieldDelta::default();
        for id in selected {
            let parent = match self.store.get(&id) {
                Ok(Some(parent)) => parent,
                Ok(None) => continue,
                Err(err) => {
                    warn!(flower = %id, error = %err, "skipping unreadable spread parent");
                    continue;
                }
            };
            let theta = rng.gen_range(0.0..TAU);
            let offset = exclusion_radius * SPREAD_OFFSET_FACTOR;
            let offspring: Vec<FlowerPacket> = (0..2)
                .map(|i| {
                    let angle = theta + i as f64 * FRAC_PI_2;
                    FlowerPacket {
                        id: new_flower_id(),
                        location: Vec2::new(
                            parent.location.x + angle.cos() * offset,
                            parent.location.y + angle.sin() * offset,
                        ),
                        genome: parent.genome.mutate(rng),
                    }
                })
                .collect();
            delta.merge(self.add_flowers(&offspring, exclusion_radius));
        }
        delta.normalize();
        delta
    }

    /// Ids of flowers within `radius` of a point, boundary inclusive.
    pub fn flowers_around(&self, x: f64, y: f64, radius: f64) -> Vec<String> {
        self.index.query_circle(x, y, radius)
    }

    /// Full records for `ids`; absent ids are silently omitted.
    pub fn fetch(&self, ids: &[String]) -> Result<Vec<FlowerPacket>, StoreError> {
        self.store.get_many(ids)
    }

    pub fn flower_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn location(&self, id: &str) -> Option<Vec2> {
        self.index.location(id)
    }

    /// Wipe the store and the index.
    pub fn erase(&mut self) -> Result<usize, StoreError> {
        let removed = self.store.erase()?;
        self.index.clear();
        Ok(removed)
    }

    pub fn store(&self) -> &FlowerStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use florafield_protocol::FlowerGenome;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn temp_field() -> FlowerField {
        let p = std::env::temp_dir().join(format!(
            "florafield-field-test-{}.db",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        let store = FlowerStore::new(p);
        let _ = store.open().expect("open db");
        FlowerField::new(store, 1000.0, 1000.0)
    }

    fn packet(id: &str, x: f64, y: f64) -> FlowerPacket {
        FlowerPacket {
            id: id.to_string(),
            location: Vec2::new(x, y),
            genome: FlowerGenome::preset(),
        }
    }

    #[test]
    fn close_insert_evicts_existing_neighbor() {
        let mut field = temp_field();
        field.add_flowers(&[packet("a", 0.0, 0.0)], 0.5);
        let delta = field.add_flowers(&[packet("b", 0.0, 0.3)], 0.5);
        assert_eq!(delta.removed, vec!["a".to_string()]);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(field.flower_count(), 1);
        assert!(field.contains("b"));
        assert!(field.store().get("a").unwrap().is_none());
    }

    #[test]
    fn zero_exclusion_radius_never_evicts() {
        let mut field = temp_field();
        field.add_flowers(&[packet("a", 0.0, 0.0)], 0.0);
        let delta = field.add_flowers(&[packet("b", 0.0, 0.0)], 0.0);
        assert!(delta.removed.is_empty());
        assert_eq!(field.flower_count(), 2);
    }

    #[test]
    fn duplicate_ids_are_skipped() {
        let mut field = temp_field();
        field.add_flowers(&[packet("a", 0.0, 0.0)], 0.5);
        let delta = field.add_flowers(&[packet("a", 100.0, 100.0)], 0.5);
        assert!(delta.is_empty());
        assert_eq!(field.flower_count(), 1);
        assert_eq!(field.location("a"), Some(Vec2::new(0.0, 0.0)));
    }

    #[test]
    fn failed_insert_still_reports_committed_evictions() {
        let mut field = temp_field();
        field.add_flowers(&[packet("c", 0.0, 0.0)], 0.5);
        // Seed the store with a row the index does not know about, so the
        // upcoming insert of the same id hits the primary key.
        field.store().insert(&packet("a", 90.0, 90.0)).unwrap();

        let delta = field.add_flowers(&[packet("a", 0.0, 0.3)], 0.5);

        // The eviction of "c" committed before the insert failed and must
        // still be reported; the failed flower is dropped, not half-applied.
        assert_eq!(delta.removed, vec!["c".to_string()]);
        assert!(delta.added.is_empty());
        assert!(!field.contains("a"));
        assert_eq!(field.flower_count(), 0);
    }

    #[test]
    fn minimum_separation_holds_after_every_insert() {
        let mut field = temp_field();
        let mut rng = SmallRng::seed_from_u64(42);
        let radius = 0.5;
        for i in 0..60 {
            let x = rng.gen_range(-3.0..3.0);
            let y = rng.gen_range(-3.0..3.0);
            field.add_flowers(&[packet(&format!("f{i}"), x, y)], radius);

            let ids = field.flowers_around(0.0, 0.0, 100.0);
            for (i, a) in ids.iter().enumerate() {
                for b in &ids[i + 1..] {
                    let pa = field.location(a).unwrap();
                    let pb = field.location(b).unwrap();
                    assert!(
                        pa.distance(pb) >= radius,
                        "{a} and {b} are {} apart",
                        pa.distance(pb)
                    );
                }
            }
        }
    }

    #[test]
    fn spread_places_two_offspring_on_perpendicular_offsets() {
        let mut field = temp_field();
        field.add_flowers(&[packet("parent", 10.0, -5.0)], 0.5);
        let mut rng = SmallRng::seed_from_u64(7);
        let delta = field.spread_flowers(&mut rng, 1.0, 10, 0.5);

        assert_eq!(delta.added.len(), 2);
        let parent = Vec2::new(10.0, -5.0);
        let offsets: Vec<Vec2> = delta
            .added
            .iter()
            .map(|p| Vec2::new(p.location.x - parent.x, p.location.y - parent.y))
            .collect();
        for o in &offsets {
            assert!((o.x.hypot(o.y) - 0.55).abs() < 1e-9);
        }
        let dot = offsets[0].x * offsets[1].x + offsets[0].y * offsets[1].y;
        assert!(dot.abs() < 1e-9, "offspring offsets not perpendicular");
        // Offspring sit outside the parent's exclusion radius, so the parent
        // survives its own children.
        assert!(field.contains("parent"));
        assert_eq!(field.flower_count(), 3);
    }

    #[test]
    fn spread_cap_limits_selected_parents() {
        let mut field = temp_field();
        for i in 0..6 {
            // Far enough apart that offspring never cross-evict.
            field.add_flowers(&[packet(&format!("p{i}"), i as f64 * 100.0, 0.0)], 0.5);
        }
        let mut rng = SmallRng::seed_from_u64(3);
        let delta = field.spread_flowers(&mut rng, 1.0, 2, 0.5);
        assert_eq!(delta.added.len(), 4);
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn zero_fraction_spreads_nothing() {
        let mut field = temp_field();
        field.add_flowers(&[packet("a", 0.0, 0.0)], 0.5);
        let mut rng = SmallRng::seed_from_u64(1);
        let delta = field.spread_flowers(&mut rng, 0.0, 10, 0.5);
        assert!(delta.is_empty());
    }

    #[test]
    fn offspring_genomes_are_mutated_independently() {
        let mut field = temp_field();
        field.add_flowers(&[packet("parent", 0.0, 0.0)], 0.5);
        let mut rng = SmallRng::seed_from_u64(99);
        let delta = field.spread_flowers(&mut rng, 1.0, 10, 0.5);
        assert_eq!(delta.added.len(), 2);
        // With variance 0.5 on every unlocked trait, two independent
        // mutations of the same preset genome are all but guaranteed to
        // differ from it and from each other.
        assert_ne!(delta.added[0].genome, delta.added[1].genome);
    }

    #[test]
    fn initialize_rebuilds_index_from_store() {
        let mut field = temp_field();
        field.add_flowers(&[packet("a", 1.0, 2.0), packet("b", 50.0, 50.0)], 0.5);
        let store = field.store().clone();
        let mut reopened = FlowerField::new(store, 1000.0, 1000.0);
        assert_eq!(reopened.initialize().unwrap(), 2);
        assert_eq!(reopened.flowers_around(1.0, 2.0, 0.1), vec!["a".to_string()]);
    }

    #[test]
    fn erase_clears_store_and_index() {
        let mut field = temp_field();
        field.add_flowers(&[packet("a", 0.0, 0.0)], 0.5);
        assert_eq!(field.erase().unwrap(), 1);
        assert_eq!(field.flower_count(), 0);
        assert_eq!(field.store().count().unwrap(), 0);
    }
}
