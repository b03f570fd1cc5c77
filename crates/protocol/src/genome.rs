//! Genes and genomes describing a flower's appearance.
//!
//! A [`Gene`] is a single scalar trait plus a lock flag; a [`FlowerGenome`] is
//! the closed, fixed set of genes one flower carries. Mutation parameters are
//! keyed by trait, not carried per instance, so a gene on the wire is just its
//! value and lock state.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mutation parameters associated with one trait.
///
/// `min`/`max` bound fresh draws and mutation targets; mutated values are not
/// clamped afterwards and may drift outside the nominal range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneSpec {
    pub min: f64,
    pub max: f64,
    /// Chance an unlocked gene locks on mutation.
    pub lock_chance: f64,
    /// Chance a locked gene unlocks on mutation.
    pub unlock_chance: f64,
    /// How far a mutation pulls the value toward a fresh random target.
    pub variance: f64,
    /// Value used by [`FlowerGenome::preset`].
    pub default: f64,
}

impl GeneSpec {
    /// Apply the lock hysteresis step to an existing lock state.
    fn settle_lock(self, locked: bool, rng: &mut impl Rng) -> bool {
        if locked {
            !rng.gen_bool(self.unlock_chance)
        } else {
            rng.gen_bool(self.lock_chance)
        }
    }
}

/// A single named scalar trait. Immutable: every operation returns a new gene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gene {
    pub value: f64,
    pub is_locked: bool,
}

impl Gene {
    pub fn new(value: f64, is_locked: bool) -> Self {
        Self { value, is_locked }
    }

    /// Fresh gene: value uniform in `[min, max)`, lock state drawn from a fair
    /// coin and then settled through the hysteresis step, which biases the
    /// steady state toward whichever of lock/unlock chance dominates.
    pub fn random(spec: GeneSpec, rng: &mut impl Rng) -> Self {
        let value = rng.gen_range(spec.min..spec.max);
        let is_locked = spec.settle_lock(rng.gen_bool(0.5), rng);
        Self { value, is_locked }
    }

    /// Derive a mutated gene.
    ///
    /// An unlocked gene takes a damped step toward a fresh uniform target; a
    /// locked gene keeps its value. The lock state flips independently via the
    /// hysteresis rule, judged on the pre-mutation state.
    pub fn mutate(&self, spec: GeneSpec, rng: &mut impl Rng) -> Self {
        let value = if self.is_locked {
            self.value
        } else {
            let target = rng.gen_range(spec.min..spec.max);
            self.value + (target - self.value) * spec.variance
        };
        let is_locked = spec.settle_lock(self.is_locked, rng);
        Self { value, is_locked }
    }
}

macro_rules! flower_traits {
    ($( $field:ident / $variant:ident => $spec:expr ),+ $(,)?) => {
        /// The closed set of recognized traits. Unknown trait names are
        /// unrepresentable by construction.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum FlowerTrait {
            $($variant,)+
        }

        impl FlowerTrait {
            pub const ALL: &'static [FlowerTrait] = &[$(FlowerTrait::$variant,)+];

            /// Mutation parameters for this trait.
            pub const fn spec(self) -> GeneSpec {
                match self {
                    $(FlowerTrait::$variant => $spec,)+
                }
            }
        }

        /// One gene per recognized trait, always all present.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", deny_unknown_fields)]
        pub struct FlowerGenome {
            $(pub $field: Gene,)+
        }

        impl FlowerGenome {
            /// Genome with every trait at its default value, unlocked.
            pub fn preset() -> Self {
                Self {
                    $($field: Gene::new(FlowerTrait::$variant.spec().default, false),)+
                }
            }

            /// Genome with every gene drawn fresh.
            pub fn random(rng: &mut impl Rng) -> Self {
                Self {
                    $($field: Gene::random(FlowerTrait::$variant.spec(), rng),)+
                }
            }

            /// Derive a genome with every gene independently mutated. The
            /// input genome is untouched; traits do not couple.
            pub fn mutate(&self, rng: &mut impl Rng) -> Self {
                Self {
                    $($field: self.$field.mutate(FlowerTrait::$variant.spec(), rng),)+
                }
            }

            pub fn gene(&self, t: FlowerTrait) -> Gene {
                match t {
                    $(FlowerTrait::$variant => self.$field,)+
                }
            }
        }
    };
}

flower_traits! {
    // field / trait => min, max, lock chance, unlock chance, variance, default
    num_petals / NumPetals => GeneSpec { min: 1.0, max: 10.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 5.0 },
    petal_width / PetalWidth => GeneSpec { min: 0.1, max: 1.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.5 },
    petal_length / PetalLength => GeneSpec { min: 0.1, max: 2.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 1.0 },
    flower_closed / FlowerClosed => GeneSpec { min: -0.5, max: 0.8, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.1 },
    teardrop_shape / TeardropShape => GeneSpec { min: 0.1, max: 0.9, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.7 },
    petal_curl / PetalCurl => GeneSpec { min: -0.5, max: 0.5, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.1 },
    petal_tip_curl / PetalTipCurl => GeneSpec { min: -0.05, max: 0.05, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.04 },
    petal_center_curl / PetalCenterCurl => GeneSpec { min: -0.02, max: 0.02, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: -0.01 },
    petal_size / PetalSize => GeneSpec { min: 0.0, max: 2.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 1.0 },
    first_petal_size / FirstPetalSize => GeneSpec { min: 0.0, max: 2.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 1.0 },
    petal_hue / PetalHue => GeneSpec { min: 0.0, max: 1.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.0 },
    petal_sat / PetalSat => GeneSpec { min: 0.0, max: 1.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.8 },
    petal_vib / PetalVib => GeneSpec { min: 0.0, max: 1.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.9 },
    stem_length / StemLength => GeneSpec { min: 1.0, max: 3.0, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 2.5 },
    stem_thickness / StemThickness => GeneSpec { min: 0.04, max: 0.06, lock_chance: 0.1, unlock_chance: 0.1, variance: 0.5, default: 0.05 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn spec(lock_chance: f64, unlock_chance: f64, variance: f64) -> GeneSpec {
        GeneSpec {
            min: 0.0,
            max: 1.0,
            lock_chance,
            unlock_chance,
            variance,
            default: 0.5,
        }
    }

    #[test]
    fn locked_gene_value_never_changes() {
        let mut rng = SmallRng::seed_from_u64(7);
        // unlock_chance 1.0: the gene always unlocks, but the value step is
        // judged on the pre-mutation state and must stay put.
        let gene = Gene::new(0.25, true);
        for _ in 0..100 {
            let next = gene.mutate(spec(0.5, 1.0, 0.9), &mut rng);
            assert_eq!(next.value, 0.25);
            assert!(!next.is_locked);
        }
    }

    #[test]
    fn zero_variance_keeps_value() {
        let mut rng = SmallRng::seed_from_u64(8);
        let gene = Gene::new(0.4, false);
        for _ in 0..100 {
            let next = gene.mutate(spec(0.0, 0.0, 0.0), &mut rng);
            assert_eq!(next.value, 0.4);
        }
    }

    #[test]
    fn lock_hysteresis_is_deterministic_at_extremes() {
        let mut rng = SmallRng::seed_from_u64(9);
        let unlocked = Gene::new(0.5, false);
        assert!(unlocked.mutate(spec(1.0, 0.0, 0.5), &mut rng).is_locked);
        let locked = Gene::new(0.5, true);
        assert!(!locked.mutate(spec(0.0, 1.0, 0.5), &mut rng).is_locked);
        assert!(locked.mutate(spec(0.0, 0.0, 0.5), &mut rng).is_locked);
    }

    #[test]
    fn unlocked_mutation_stays_between_value_and_target_range() {
        let mut rng = SmallRng::seed_from_u64(10);
        let s = spec(0.0, 0.0, 0.5);
        let mut gene = Gene::new(0.5, false);
        for _ in 0..200 {
            gene = gene.mutate(s, &mut rng);
            // A damped pull toward a target in [min, max) cannot escape the
            // hull of the current value and the target range.
            assert!(gene.value >= 0.0 && gene.value < 1.0);
        }
    }

    #[test]
    fn random_genes_respect_trait_bounds() {
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..50 {
            for &t in FlowerTrait::ALL {
                let s = t.spec();
                let gene = Gene::random(s, &mut rng);
                assert!(gene.value >= s.min && gene.value < s.max, "{t:?}");
            }
        }
    }

    #[test]
    fn preset_genome_defaults_are_reachable_by_trait() {
        let genome = FlowerGenome::preset();
        for &t in FlowerTrait::ALL {
            let gene = genome.gene(t);
            assert_eq!(gene.value, t.spec().default, "{t:?}");
            assert!(!gene.is_locked, "{t:?}");
        }
    }

    #[test]
    fn genome_mutate_leaves_parent_untouched() {
        let mut rng = SmallRng::seed_from_u64(12);
        let parent = FlowerGenome::random(&mut rng);
        let snapshot = parent.clone();
        let _child = parent.mutate(&mut rng);
        assert_eq!(parent, snapshot);
    }

    #[test]
    fn genome_clone_is_independent() {
        let mut rng = SmallRng::seed_from_u64(13);
        let original = FlowerGenome::random(&mut rng);
        let mut copy = original.clone();
        assert_eq!(copy, original);
        copy.petal_hue = Gene::new(-42.0, true);
        assert_ne!(copy, original);
        assert_ne!(original.petal_hue.value, -42.0);
    }

    #[test]
    fn genome_serializes_with_camel_case_trait_names() {
        let json = serde_json::to_value(FlowerGenome::preset()).unwrap();
        let map = json.as_object().unwrap();
        assert_eq!(map.len(), FlowerTrait::ALL.len());
        for key in ["numPetals", "petalTipCurl", "stemThickness"] {
            assert!(map.contains_key(key), "missing {key}");
        }
        let back: FlowerGenome = serde_json::from_value(json).unwrap();
        assert_eq!(back, FlowerGenome::preset());
    }

    #[test]
    fn genome_rejects_unknown_trait_names() {
        let mut json = serde_json::to_value(FlowerGenome::preset()).unwrap();
        json.as_object_mut().unwrap().insert(
            "thornLength".to_string(),
            serde_json::json!({"value": 1.0, "isLocked": false}),
        );
        assert!(serde_json::from_value::<FlowerGenome>(json).is_err());
    }
}
