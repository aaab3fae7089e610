//! Per-species parameters: field bounds for new records, trophy bands, and
//! the visual-seed to fur mapping.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::record::Gender;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FurWeight {
    pub key: String,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenderConfig {
    pub weight_low: f32,
    pub weight_high: f32,
    pub score_low: f32,
    pub score_high: f32,
    /// Fur keys in the order the game rolls them.
    #[serde(default)]
    pub furs: Vec<FurWeight>,
    #[serde(default)]
    pub fur_total_probability: f64,
}

impl GenderConfig {
    pub fn bounds(&self) -> FieldBounds {
        FieldBounds {
            weight_low: self.weight_low,
            weight_high: self.weight_high,
            score_low: self.score_low,
            score_high: self.score_high,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FieldBounds {
    pub weight_low: f32,
    pub weight_high: f32,
    pub score_low: f32,
    pub score_high: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrophyTable {
    pub bronze: Option<FieldBounds>,
    pub silver: Option<FieldBounds>,
    pub gold: Option<FieldBounds>,
    pub diamond: Option<FieldBounds>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeciesConfig {
    /// Keyed by `male`, `female`, `great_one_male`, `great_one_female`.
    pub gender: HashMap<String, GenderConfig>,
    #[serde(default)]
    pub trophy: Option<TrophyTable>,
    /// Antler/horn scores are partly random for these species.
    #[serde(default)]
    pub truracs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKind {
    pub gender: Gender,
    pub great_one: bool,
}

impl RecordKind {
    pub fn new(gender: Gender, great_one: bool) -> Self {
        Self { gender, great_one }
    }

    fn key(&self) -> String {
        if self.great_one {
            format!("great_one_{}", self.gender.key())
        } else {
            self.gender.key().to_string()
        }
    }
}

/// Which genders a trait such as Great One or diamond applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderSet {
    Male,
    Female,
    Both,
}

impl GenderSet {
    pub fn allows(self, gender: Gender) -> bool {
        matches!(
            (self, gender),
            (GenderSet::Both, _) | (GenderSet::Male, Gender::Male) | (GenderSet::Female, Gender::Female)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trophy {
    None,
    Bronze,
    Silver,
    Gold,
    Diamond,
    GreatOne,
    Unknown,
}

impl SpeciesConfig {
    pub fn gender_config(&self, kind: RecordKind) -> Option<&GenderConfig> {
        self.gender.get(&kind.key())
    }

    pub fn great_one_gender(&self) -> Option<GenderSet> {
        let male = self.gender.contains_key("great_one_male");
        let female = self.gender.contains_key("great_one_female");
        match (male, female) {
            (true, true) => Some(GenderSet::Both),
            (true, false) => Some(GenderSet::Male),
            (false, true) => Some(GenderSet::Female),
            (false, false) => None,
        }
    }

    /// Genders whose score range reaches the diamond band.
    pub fn diamond_gender(&self) -> Option<GenderSet> {
        let diamond_low = self.trophy.as_ref()?.diamond?.score_low;
        let reaches = |key: &str| self.gender.get(key).map_or(false, |g| g.score_high >= diamond_low);
        match (reaches("male"), reaches("female")) {
            (true, true) => Some(GenderSet::Both),
            (true, false) => Some(GenderSet::Male),
            (false, true) => Some(GenderSet::Female),
            (false, false) => None,
        }
    }

    pub fn is_diamond(&self, gender: Gender, score: f32) -> bool {
        self.diamond_gender().map_or(false, |set| set.allows(gender))
            && self.trophy_for(score, false) == Trophy::Diamond
    }

    /// Diamond bounds, with the low end raised by a fifth of the range for
    /// species whose racks can drag a low diamond down to gold.
    pub fn safe_diamond_bounds(&self) -> Option<FieldBounds> {
        let mut bounds = self.trophy.as_ref()?.diamond?;
        if self.truracs {
            let weight_range = (bounds.weight_high - bounds.weight_low).abs();
            let score_range = (bounds.score_high - bounds.score_low).abs();
            bounds.weight_low = bounds.weight_low.min(bounds.weight_high) + 0.2 * weight_range;
            bounds.score_low = bounds.score_low.min(bounds.score_high) + 0.2 * score_range;
        }
        Some(bounds)
    }

    pub fn trophy_for(&self, score: f32, great_one: bool) -> Trophy {
        if great_one {
            return Trophy::GreatOne;
        }
        let Some(table) = &self.trophy else {
            return Trophy::None;
        };
        let bands = [
            (table.bronze, Trophy::Bronze),
            (table.silver, Trophy::Silver),
            (table.gold, Trophy::Gold),
            (table.diamond, Trophy::Diamond),
        ];
        bands
            .into_iter()
            .find_map(|(band, trophy)| {
                band.filter(|b| b.score_low <= score && score <= b.score_high)
                    .map(|_| trophy)
            })
            .unwrap_or(Trophy::None)
    }
}

/// Immutable catalog of species parameters, loaded once and shared by
/// reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpeciesCatalog {
    pub species: HashMap<String, SpeciesConfig>,
}

impl SpeciesCatalog {
    pub fn from_json_str(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn species(&self, key: &str) -> Option<&SpeciesConfig> {
        self.species.get(key)
    }

    pub fn record_field_bounds(&self, species_key: &str, kind: RecordKind) -> Option<FieldBounds> {
        self.species(species_key)?.gender_config(kind).map(GenderConfig::bounds)
    }

    pub fn trophy_for(&self, species_key: &str, score: f32, great_one: bool) -> Trophy {
        match self.species(species_key) {
            Some(config) => config.trophy_for(score, great_one),
            None if great_one => Trophy::GreatOne,
            None => Trophy::Unknown,
        }
    }

    /// Draws random seeds until one maps onto a fur of this kind, or onto
    /// `fur` when given.
    pub fn choose_seed<R: Rng + ?Sized>(
        &self,
        species_key: &str,
        kind: RecordKind,
        fur: Option<&str>,
        rng: &mut R,
        max_attempts: u32,
    ) -> Option<u32> {
        let config = self.species(species_key)?.gender_config(kind)?;
        if let Some(want) = fur {
            if !config.furs.iter().any(|f| f.key == want) {
                return None;
            }
        }
        for _ in 0..max_attempts {
            let seed: u32 = rng.gen();
            if let Some(found) = fur_for_seed(seed, config) {
                if fur.map_or(true, |want| want == found) {
                    debug!(seed, fur = found, "found seed");
                    return Some(seed);
                }
            }
        }
        None
    }
}

/// Weight and score in roughly the same percentile of their ranges, each
/// fuzzed by up to 1% of its range and clamped into bounds.
pub fn generate_weight_and_score<R: Rng + ?Sized>(
    bounds: &FieldBounds,
    percentile: Option<f32>,
    fuzz: bool,
    rng: &mut R,
) -> (f32, f32) {
    let percentile = percentile.unwrap_or_else(|| rng.gen_range(0.01_f32..=1.0));
    let mut roll = |low: f32, high: f32| {
        let variation = if fuzz {
            rng.gen_range(-0.01_f32..=0.01) * (high - low)
        } else {
            0.0
        };
        (low + percentile * (high - low) + variation).clamp(low.min(high), high.max(low))
    };
    let weight = roll(bounds.weight_low, bounds.weight_high);
    let score = roll(bounds.score_low, bounds.score_high);
    (weight, score)
}

/// The game's fur roll: one LCG step, folded into the mantissa of a float
/// in `[1, 2)`.
pub fn seed_to_probability(seed: u32) -> f32 {
    let stepped = (0x343FD_u64 * u64::from(seed) + 0x26_9EC3) >> 16;
    let bits = ((stepped | 0x3F_8000) << 8) & 0xFFFF_FFFF;
    f32::from_bits(bits as u32).abs() - 1.0
}

/// Fur produced by `seed`, if the roll lands inside the configured weights.
pub fn fur_for_seed(seed: u32, config: &GenderConfig) -> Option<&str> {
    let probability = f64::from(seed_to_probability(seed));
    if !probability.is_finite() || config.fur_total_probability <= 0.0 {
        return None;
    }
    let mut cumulative = 0.0;
    for fur in &config.furs {
        cumulative += fur.probability / config.fur_total_probability;
        if cumulative >= probability {
            return Some(&fur.key);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const CATALOG: &str = r#"{
        "species": {
            "whitetail_deer": {
                "gender": {
                    "male": {
                        "weight_low": 59.0, "weight_high": 100.0,
                        "score_low": 71.2, "score_high": 275.5,
                        "furs": [
                            { "key": "brown", "probability": 90.0 },
                            { "key": "albino", "probability": 10.0 }
                        ],
                        "fur_total_probability": 100.0
                    },
                    "female": {
                        "weight_low": 45.0, "weight_high": 60.0,
                        "score_low": 0.0, "score_high": 0.0,
                        "furs": [{ "key": "brown", "probability": 1.0 }],
                        "fur_total_probability": 1.0
                    },
                    "great_one_male": {
                        "weight_low": 120.0, "weight_high": 140.0,
                        "score_low": 300.0, "score_high": 350.0,
                        "furs": [{ "key": "fabled", "probability": 1.0 }],
                        "fur_total_probability": 1.0
                    }
                },
                "trophy": {
                    "bronze": { "weight_low": 59.0, "weight_high": 70.0, "score_low": 71.2, "score_high": 120.0 },
                    "gold": { "weight_low": 80.0, "weight_high": 90.0, "score_low": 180.0, "score_high": 220.0 },
                    "diamond": { "weight_low": 90.0, "weight_high": 100.0, "score_low": 220.0, "score_high": 275.5 }
                },
                "truracs": true
            }
        }
    }"#;

    fn catalog() -> SpeciesCatalog {
        SpeciesCatalog::from_json_str(CATALOG).unwrap()
    }

    fn two_furs() -> GenderConfig {
        GenderConfig {
            weight_low: 1.0,
            weight_high: 2.0,
            score_low: 1.0,
            score_high: 2.0,
            furs: vec![
                FurWeight { key: "common".into(), probability: 3.0 },
                FurWeight { key: "rare".into(), probability: 1.0 },
            ],
            fur_total_probability: 4.0,
        }
    }

    #[test]
    fn seed_probability_matches_the_game_roll() {
        assert_eq!(seed_to_probability(0), 0.001_159_667_968_75);
        assert_eq!(seed_to_probability(7515), 0.750_091_552_734_375);
        // Sign bit set: folded back through abs().
        assert_eq!(seed_to_probability(2_573_035), 0.423_583_984_375);
        assert!(seed_to_probability(3_837_140_181).is_nan());
    }

    #[test]
    fn fur_follows_cumulative_weights() {
        let config = two_furs();
        assert_eq!(fur_for_seed(0, &config), Some("common"));
        assert_eq!(fur_for_seed(7515, &config), Some("rare"));
        assert_eq!(fur_for_seed(3_837_140_181, &config), None);
    }

    #[test]
    fn fur_with_no_weights_is_unknown() {
        let mut config = two_furs();
        config.fur_total_probability = 0.0;
        assert_eq!(fur_for_seed(0, &config), None);
    }

    #[test]
    fn bounds_come_from_gender_keys() {
        let catalog = catalog();
        let male = catalog
            .record_field_bounds("whitetail_deer", RecordKind::new(Gender::Male, false))
            .unwrap();
        assert_eq!((male.weight_low, male.weight_high), (59.0, 100.0));
        let great_one = catalog
            .record_field_bounds("whitetail_deer", RecordKind::new(Gender::Male, true))
            .unwrap();
        assert_eq!(great_one.score_low, 300.0);
        assert!(catalog
            .record_field_bounds("whitetail_deer", RecordKind::new(Gender::Female, true))
            .is_none());
        assert!(catalog
            .record_field_bounds("moose", RecordKind::new(Gender::Male, false))
            .is_none());
    }

    #[test]
    fn generated_values_stay_in_bounds() {
        let bounds = catalog()
            .record_field_bounds("whitetail_deer", RecordKind::new(Gender::Male, false))
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let (weight, score) = generate_weight_and_score(&bounds, None, true, &mut rng);
            assert!((59.0..=100.0).contains(&weight), "weight {weight}");
            assert!((71.2..=275.5).contains(&score), "score {score}");
        }
    }

    #[test]
    fn fixed_percentile_without_fuzz_is_exact() {
        let bounds = FieldBounds {
            weight_low: 59.0,
            weight_high: 100.0,
            score_low: 71.0,
            score_high: 275.0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let (weight, score) = generate_weight_and_score(&bounds, Some(0.5), false, &mut rng);
        assert_eq!(weight, 79.5);
        assert_eq!(score, 173.0);
    }

    #[test]
    fn chosen_seed_maps_to_requested_fur() {
        let catalog = catalog();
        let kind = RecordKind::new(Gender::Male, false);
        let mut rng = StdRng::seed_from_u64(99);
        let seed = catalog
            .choose_seed("whitetail_deer", kind, Some("albino"), &mut rng, 1_000_000)
            .unwrap();
        let config = catalog.species("whitetail_deer").unwrap().gender_config(kind).unwrap();
        assert_eq!(fur_for_seed(seed, config), Some("albino"));
    }

    #[test]
    fn unknown_fur_or_species_yields_none() {
        let catalog = catalog();
        let kind = RecordKind::new(Gender::Male, false);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(catalog.choose_seed("whitetail_deer", kind, Some("piebald"), &mut rng, 2_000), None);
        assert_eq!(catalog.choose_seed("moose", kind, None, &mut rng, 2_000), None);
    }

    #[test]
    fn great_one_gender_from_keys() {
        let species = catalog().species("whitetail_deer").cloned().unwrap();
        assert_eq!(species.great_one_gender(), Some(GenderSet::Male));
        assert!(GenderSet::Male.allows(Gender::Male));
        assert!(!GenderSet::Male.allows(Gender::Female));
    }

    #[test]
    fn diamonds_only_for_genders_that_reach_the_band() {
        let species = catalog().species("whitetail_deer").cloned().unwrap();
        assert_eq!(species.diamond_gender(), Some(GenderSet::Male));
        assert!(species.is_diamond(Gender::Male, 240.0));
        assert!(!species.is_diamond(Gender::Male, 200.0));
        assert!(!species.is_diamond(Gender::Female, 240.0));
    }

    #[test]
    fn truracs_diamonds_raise_the_floor() {
        let species = catalog().species("whitetail_deer").cloned().unwrap();
        let safe = species.safe_diamond_bounds().unwrap();
        assert!((safe.weight_low - 92.0).abs() < 1e-4);
        assert!((safe.score_low - 231.1).abs() < 1e-3);
        assert_eq!(safe.weight_high, 100.0);
    }

    #[test]
    fn trophies_by_score_band() {
        let catalog = catalog();
        assert_eq!(catalog.trophy_for("whitetail_deer", 100.0, false), Trophy::Bronze);
        assert_eq!(catalog.trophy_for("whitetail_deer", 230.0, false), Trophy::Diamond);
        assert_eq!(catalog.trophy_for("whitetail_deer", 150.0, false), Trophy::None);
        assert_eq!(catalog.trophy_for("whitetail_deer", 150.0, true), Trophy::GreatOne);
        assert_eq!(catalog.trophy_for("moose", 150.0, false), Trophy::Unknown);
    }
}
