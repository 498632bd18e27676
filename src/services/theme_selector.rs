use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use rand::Rng;
use uuid::Uuid;

use crate::{
    dao::{models::ThemeEntity, party_store::PartyStore},
    error::ServiceError,
};

/// Source of the index picked among the candidate themes.
pub trait ThemePicker: Send + Sync {
    /// Return an index in `0..candidates`. Only called with `candidates > 0`.
    fn pick(&self, candidates: usize) -> usize;
}

/// Uniform picker backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomThemePicker;

impl ThemePicker for RandomThemePicker {
    fn pick(&self, candidates: usize) -> usize {
        rand::rng().random_range(0..candidates)
    }
}

/// Deterministic picker replaying a fixed index sequence, wrapping around.
#[derive(Debug)]
pub struct FixedSequencePicker {
    sequence: Vec<usize>,
    cursor: AtomicUsize,
}

impl FixedSequencePicker {
    /// Picker that returns `sequence` values in order. An empty sequence always picks 0.
    pub fn new(sequence: Vec<usize>) -> Self {
        Self {
            sequence,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl ThemePicker for FixedSequencePicker {
    fn pick(&self, candidates: usize) -> usize {
        if self.sequence.is_empty() {
            return 0;
        }
        let step = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.sequence[step % self.sequence.len()] % candidates
    }
}

/// Pick one catalog theme the group has not played yet.
pub fn select_unused(
    catalog: &[ThemeEntity],
    consumed: &[Uuid],
    picker: &dyn ThemePicker,
) -> Option<ThemeEntity> {
    let consumed: HashSet<&Uuid> = consumed.iter().collect();
    let candidates: Vec<&ThemeEntity> = catalog
        .iter()
        .filter(|theme| !consumed.contains(&theme.id))
        .collect();
    if candidates.is_empty() {
        return None;
    }
    let index = picker.pick(candidates.len()).min(candidates.len() - 1);
    Some(candidates[index].clone())
}

/// Load the catalog and the group's history, then pick an unused theme.
pub async fn choose_theme(
    store: &dyn PartyStore,
    group_id: Uuid,
    picker: &dyn ThemePicker,
) -> Result<Option<ThemeEntity>, ServiceError> {
    let catalog = store.list_themes().await?;
    let consumed = store.list_consumed_theme_ids(group_id).await?;
    Ok(select_unused(&catalog, &consumed, picker))
}
