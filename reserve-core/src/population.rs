//! Batch edits over the groups of one species: adding and removing records,
//! same-size makeovers, and re-rolling or hand-editing single records.
//!
//! Batch workflows close each unit of work with [`EditSession::checkpoint`],
//! so a session with a save directory has everything up to a failure on
//! disk. Single-record edits leave that to the caller.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::record::{FixedRecord, Gender, RecordView};
use crate::session::EditSession;
use crate::species::{generate_weight_and_score, FieldBounds, GenderSet, RecordKind, SpeciesCatalog, SpeciesConfig};
use crate::value::{TreeParser, Value, ValuePath};
use crate::{EditorSettings, ReserveError, Result};

const ANIMALS: &str = "Animals";

/// Overrides for [`reroll_record`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RollOptions<'a> {
    /// Weight and score range to draw from instead of the kind's own.
    pub bounds: Option<FieldBounds>,
    /// Fur the new visual seed has to produce.
    pub fur: Option<&'a str>,
}

/// A same-size change applied to a batch of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Makeover {
    /// Re-roll as a Great One, optionally with a given fur.
    GreatOne { fur: Option<String> },
    /// Move weight and score into the diamond band. The look only changes
    /// when a fur is given.
    Diamond { fur: Option<String> },
    /// New visual seed, for a given fur or any fur of the record's kind.
    Fur { fur: Option<String> },
    /// Turn records of the other gender into this one, keeping their weight
    /// percentile and visual seed.
    Gender(Gender),
}

/// How [`modify_record`] picks the visual seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Look {
    Seed(u32),
    /// Draw a seed for this fur, or for any fur when `None`.
    Fur(Option<String>),
}

/// Explicit field values for [`modify_record`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEdit {
    pub gender: Gender,
    pub great_one: bool,
    pub weight: f32,
    pub score: f32,
    pub look: Look,
}

/// Adds `count` records of `gender` to the groups under `groups`, one per
/// group in turn.
///
/// Each new record is a copy of its group's first record with gender,
/// weight, score and visual seed re-rolled. Empty groups are never chosen
/// and groups already holding `settings.max_group_size` records are
/// skipped. Returns how many records were added.
#[allow(clippy::too_many_arguments)]
pub fn add_records<P: TreeParser, R: Rng + ?Sized>(
    session: &mut EditSession<P>,
    settings: &EditorSettings,
    catalog: &SpeciesCatalog,
    species_key: &str,
    groups: &ValuePath,
    count: usize,
    gender: Gender,
    rng: &mut R,
) -> Result<usize> {
    let eligible: Vec<usize> = group_sizes(session, groups)?
        .into_iter()
        .enumerate()
        .filter(|(_, size)| *size > 0)
        .map(|(i, _)| i)
        .collect();
    if eligible.is_empty() {
        return Err(ReserveError::NotFound(format!("no group under {groups} holds a record to copy")));
    }

    let kind = RecordKind::new(gender, false);
    let mut added = 0;
    let mut full = HashSet::new();
    let mut cursor = 0;
    while added < count && full.len() < eligible.len() {
        let group = eligible[cursor % eligible.len()];
        cursor += 1;
        if full.contains(&group) {
            continue;
        }
        let animals = groups.clone().index(group).member(ANIMALS);
        let size = array_len(session, &animals)?;
        if size >= settings.max_group_size {
            info!(group, size, "skipping full group");
            full.insert(group);
            continue;
        }

        let template = session.record(&animals.clone().index(0))?;
        let mut record = roll(&template, catalog, species_key, kind, RollOptions::default(), settings, rng)?;
        record.id = 0;
        session.insert_record(&animals, &record)?;
        session.checkpoint()?;
        added += 1;
        debug!(group, added, count, "added record");
    }

    if added == 0 && count > 0 {
        return Err(ReserveError::Capacity {
            limit: settings.max_group_size,
        });
    }
    info!(species = species_key, added, requested = count, gender = gender.key(), "added records");
    Ok(added)
}

/// Removes up to `count` records of `gender` from the groups under
/// `groups`, one per group in turn.
///
/// Only groups holding at least `settings.min_group_size` records give one
/// up, and a group is never emptied. Returns how many records were removed.
pub fn remove_records<P: TreeParser>(
    session: &mut EditSession<P>,
    settings: &EditorSettings,
    species_key: &str,
    groups: &ValuePath,
    count: usize,
    gender: Gender,
) -> Result<usize> {
    let floor = settings.min_group_size.max(2);
    let eligible: Vec<usize> = group_sizes(session, groups)?
        .into_iter()
        .enumerate()
        .filter(|(_, size)| *size >= floor)
        .map(|(i, _)| i)
        .collect();
    if eligible.is_empty() {
        return Err(ReserveError::NotFound(format!(
            "no group under {groups} holds {floor} or more records"
        )));
    }

    let mut removed = 0;
    let mut skipped = HashSet::new();
    let mut cursor = 0;
    while removed < count && skipped.len() < eligible.len() {
        let group = eligible[cursor % eligible.len()];
        cursor += 1;
        if skipped.contains(&group) {
            continue;
        }
        let animals = groups.clone().index(group).member(ANIMALS);
        let array = session
            .tree()
            .root
            .get(&animals)
            .ok_or_else(|| ReserveError::NotFound(format!("no value at {animals}")))?;
        let size = array.elements().map_or(0, <[Value]>::len);
        if size < floor {
            debug!(group, size, "skipping small group");
            skipped.insert(group);
            continue;
        }
        let Some(victim) = find_victim(array, gender) else {
            debug!(group, gender = gender.key(), "no matching record");
            skipped.insert(group);
            continue;
        };

        session.remove_record(&animals, victim)?;
        session.checkpoint()?;
        removed += 1;
        debug!(group, victim, removed, count, "removed record");
    }

    info!(species = species_key, removed, requested = count, gender = gender.key(), "removed records");
    Ok(removed)
}

/// Index of the first record of `gender` in an array of records.
pub fn find_victim(animals: &Value, gender: Gender) -> Option<usize> {
    animals
        .elements()?
        .iter()
        .position(|node| RecordView::read(node).map_or(false, |r| r.gender == gender))
}

/// Paths of the records under `groups` that satisfy `keep`, in group order.
pub fn eligible_records<P: TreeParser>(
    session: &EditSession<P>,
    groups: &ValuePath,
    mut keep: impl FnMut(&FixedRecord) -> bool,
) -> Result<Vec<ValuePath>> {
    let mut found = Vec::new();
    for (group, size) in group_sizes(session, groups)?.into_iter().enumerate() {
        let animals = groups.clone().index(group).member(ANIMALS);
        for i in 0..size {
            let path = animals.clone().index(i);
            if keep(&session.record(&path)?) {
                found.push(path);
            }
        }
    }
    Ok(found)
}

/// Applies `makeover` to `count` records picked at random from those it
/// suits, and returns their paths.
///
/// Great Ones are never picked. Diamonds are left alone by the diamond and
/// gender makeovers. Every new record is worked out before the first one is
/// written, so a failure leaves the payload untouched.
#[allow(clippy::too_many_arguments)]
pub fn makeover_records<P: TreeParser, R: Rng + ?Sized>(
    session: &mut EditSession<P>,
    settings: &EditorSettings,
    catalog: &SpeciesCatalog,
    species_key: &str,
    groups: &ValuePath,
    makeover: &Makeover,
    count: usize,
    rng: &mut R,
) -> Result<Vec<ValuePath>> {
    let species = species_config(catalog, species_key)?;
    let genders = match makeover {
        Makeover::GreatOne { .. } => species
            .great_one_gender()
            .ok_or_else(|| ReserveError::NotFound(format!("{species_key} has no Great Ones")))?,
        Makeover::Diamond { .. } => species
            .diamond_gender()
            .ok_or_else(|| ReserveError::NotFound(format!("{species_key} has no diamond band")))?,
        Makeover::Fur { .. } => GenderSet::Both,
        Makeover::Gender(Gender::Male) => GenderSet::Female,
        Makeover::Gender(Gender::Female) => GenderSet::Male,
    };
    let keep_diamonds = matches!(makeover, Makeover::GreatOne { .. } | Makeover::Fur { .. });

    let candidates = eligible_records(session, groups, |r| {
        genders.allows(r.gender) && !r.great_one && (keep_diamonds || !species.is_diamond(r.gender, r.score))
    })?;
    if candidates.len() < count {
        return Err(ReserveError::NotFound(format!(
            "only {} records under {groups} suit {makeover:?}, {count} requested",
            candidates.len()
        )));
    }
    let chosen: Vec<ValuePath> = candidates.choose_multiple(rng, count).cloned().collect();

    let mut planned = Vec::with_capacity(chosen.len());
    for path in &chosen {
        let current = session.record(path)?;
        planned.push(made_over(&current, species, catalog, species_key, makeover, settings, rng)?);
    }
    for (path, record) in chosen.iter().zip(&planned) {
        session.rewrite_record(path, record)?;
        debug!(
            path = %path,
            trophy = ?species.trophy_for(record.score, record.great_one),
            "made over record"
        );
    }
    session.checkpoint()?;
    info!(species = species_key, changed = chosen.len(), ?makeover, "made over records");
    Ok(chosen)
}

/// Re-rolls the record at `record_path` as `kind`, keeping its id and map
/// position. The payload size does not change.
#[allow(clippy::too_many_arguments)]
pub fn reroll_record<P: TreeParser, R: Rng + ?Sized>(
    session: &mut EditSession<P>,
    settings: &EditorSettings,
    catalog: &SpeciesCatalog,
    species_key: &str,
    record_path: &ValuePath,
    kind: RecordKind,
    options: RollOptions<'_>,
    rng: &mut R,
) -> Result<FixedRecord> {
    let current = session.record(record_path)?;
    let record = roll(&current, catalog, species_key, kind, options, settings, rng)?;
    session.rewrite_record(record_path, &record)?;
    debug!(path = %record_path, seed = record.visual_seed, "re-rolled record");
    Ok(record)
}

/// Sets the record at `record_path` to the values in `edit`, keeping its
/// id, flag and map position.
pub fn modify_record<P: TreeParser, R: Rng + ?Sized>(
    session: &mut EditSession<P>,
    settings: &EditorSettings,
    catalog: &SpeciesCatalog,
    species_key: &str,
    record_path: &ValuePath,
    edit: &RecordEdit,
    rng: &mut R,
) -> Result<FixedRecord> {
    let current = session.record(record_path)?;
    let visual_seed = match &edit.look {
        Look::Seed(seed) => *seed,
        Look::Fur(fur) => {
            let kind = RecordKind::new(edit.gender, edit.great_one);
            seed_for(catalog, species_key, kind, fur.as_deref(), settings, rng)?
        }
    };
    let record = FixedRecord {
        gender: edit.gender,
        great_one: edit.great_one,
        weight: edit.weight,
        score: edit.score,
        visual_seed,
        ..current
    };
    session.rewrite_record(record_path, &record)?;
    debug!(path = %record_path, seed = visual_seed, "modified record");
    Ok(record)
}

fn roll<R: Rng + ?Sized>(
    template: &FixedRecord,
    catalog: &SpeciesCatalog,
    species_key: &str,
    kind: RecordKind,
    options: RollOptions<'_>,
    settings: &EditorSettings,
    rng: &mut R,
) -> Result<FixedRecord> {
    let bounds = match options.bounds {
        Some(bounds) => bounds,
        None => kind_bounds(catalog, species_key, kind)?,
    };
    let (weight, score) = generate_weight_and_score(&bounds, None, true, rng);
    let visual_seed = seed_for(catalog, species_key, kind, options.fur, settings, rng)?;
    Ok(FixedRecord {
        gender: kind.gender,
        weight,
        score,
        great_one: kind.great_one,
        scripted: false,
        visual_seed,
        ..*template
    })
}

fn made_over<R: Rng + ?Sized>(
    current: &FixedRecord,
    species: &SpeciesConfig,
    catalog: &SpeciesCatalog,
    species_key: &str,
    makeover: &Makeover,
    settings: &EditorSettings,
    rng: &mut R,
) -> Result<FixedRecord> {
    match makeover {
        Makeover::GreatOne { fur } => {
            let options = RollOptions {
                bounds: None,
                fur: fur.as_deref(),
            };
            roll(current, catalog, species_key, RecordKind::new(current.gender, true), options, settings, rng)
        }
        Makeover::Diamond { fur } => {
            let bounds = species
                .safe_diamond_bounds()
                .ok_or_else(|| ReserveError::NotFound(format!("{species_key} has no diamond band")))?;
            let (weight, score) = generate_weight_and_score(&bounds, None, false, rng);
            let visual_seed = match fur {
                Some(fur) => {
                    let kind = RecordKind::new(current.gender, false);
                    seed_for(catalog, species_key, kind, Some(fur), settings, rng)?
                }
                None => current.visual_seed,
            };
            Ok(FixedRecord {
                weight,
                score,
                great_one: false,
                visual_seed,
                ..*current
            })
        }
        Makeover::Fur { fur } => {
            let kind = RecordKind::new(current.gender, current.great_one);
            let visual_seed = seed_for(catalog, species_key, kind, fur.as_deref(), settings, rng)?;
            Ok(FixedRecord { visual_seed, ..*current })
        }
        Makeover::Gender(gender) => {
            let old = kind_bounds(catalog, species_key, RecordKind::new(current.gender, false))?;
            let new = kind_bounds(catalog, species_key, RecordKind::new(*gender, false))?;
            let range = old.weight_high - old.weight_low;
            let percentile = if range == 0.0 {
                0.0
            } else {
                ((current.weight - old.weight_low) / range).clamp(0.0, 1.0)
            };
            let (weight, score) = generate_weight_and_score(&new, Some(percentile), false, rng);
            Ok(FixedRecord {
                gender: *gender,
                weight,
                score,
                ..*current
            })
        }
    }
}

fn species_config<'a>(catalog: &'a SpeciesCatalog, species_key: &str) -> Result<&'a SpeciesConfig> {
    catalog
        .species(species_key)
        .ok_or_else(|| ReserveError::NotFound(format!("unknown species {species_key}")))
}

fn kind_bounds(catalog: &SpeciesCatalog, species_key: &str, kind: RecordKind) -> Result<FieldBounds> {
    catalog
        .record_field_bounds(species_key, kind)
        .ok_or_else(|| ReserveError::NotFound(format!("no field bounds for {species_key} {kind:?}")))
}

fn seed_for<R: Rng + ?Sized>(
    catalog: &SpeciesCatalog,
    species_key: &str,
    kind: RecordKind,
    fur: Option<&str>,
    settings: &EditorSettings,
    rng: &mut R,
) -> Result<u32> {
    catalog
        .choose_seed(species_key, kind, fur, rng, settings.seed_attempts)
        .ok_or_else(|| match fur {
            Some(fur) => ReserveError::NotFound(format!("no {fur} visual seed for {species_key} {kind:?}")),
            None => ReserveError::NotFound(format!("no visual seed found for {species_key} {kind:?}")),
        })
}

fn group_sizes<P: TreeParser>(session: &EditSession<P>, groups: &ValuePath) -> Result<Vec<usize>> {
    let node = session
        .tree()
        .root
        .get(groups)
        .ok_or_else(|| ReserveError::NotFound(format!("no value at {groups}")))?;
    let items = node
        .elements()
        .ok_or_else(|| ReserveError::Schema(format!("{groups} is not an array")))?;
    items
        .iter()
        .enumerate()
        .map(|(i, group)| {
            group
                .member(ANIMALS)
                .and_then(Value::elements)
                .map(<[Value]>::len)
                .ok_or_else(|| ReserveError::Schema(format!("{groups}[{i}] has no {ANIMALS} array")))
        })
        .collect()
}

fn array_len<P: TreeParser>(session: &EditSession<P>, path: &ValuePath) -> Result<usize> {
    session
        .tree()
        .root
        .get(path)
        .and_then(Value::elements)
        .map(<[Value]>::len)
        .ok_or_else(|| ReserveError::NotFound(format!("no array at {path}")))
}
